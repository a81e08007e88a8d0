//! Greedy autoregressive generation over a spliced embedding sequence.
//!
//! The prompt (image rows already spliced in) is fed as embeddings. Each
//! step re-runs the full sequence, takes the argmax of the last position and
//! appends that token's embedding. Decoding is deterministic.

use ndarray::{concatenate, Array2, Axis};

use super::session::{Decoder, TokenEmbedder};
use crate::error::{RuntimeError, RuntimeResult};

/// Token embedder and decoder of one language model.
pub struct LanguageModel {
    pub embedder: TokenEmbedder,
    pub decoder: Decoder,
}

impl LanguageModel {
    /// Generate up to `max_new_tokens` ids after `prefix`, stopping at `eos`.
    ///
    /// Returns only the new ids; `eos` itself is not included.
    pub fn greedy(
        &self,
        prefix: Array2<f32>,
        attention_mask: &[i64],
        max_new_tokens: usize,
        eos: u32,
    ) -> RuntimeResult<Vec<u32>> {
        let mut embeds = prefix;
        let mut mask = attention_mask.to_vec();
        let mut generated = Vec::new();

        for _ in 0..max_new_tokens {
            let logits = self.decoder.next_token_logits(&embeds, &mask)?;
            let next = argmax(&logits).ok_or_else(|| RuntimeError::output("logits", "empty"))?;
            if next == eos {
                break;
            }
            generated.push(next);

            let row = self.embedder.embed(&[next])?;
            embeds = append_rows(&embeds, &row)?;
            mask.push(1);
        }

        tracing::trace!("Generated {} tokens", generated.len());
        Ok(generated)
    }
}

/// Index of the largest logit. NaN never wins.
pub fn argmax(logits: &[f32]) -> Option<u32> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i as u32)
}

/// Stack `rows` under `embeds`.
pub fn append_rows(embeds: &Array2<f32>, rows: &Array2<f32>) -> RuntimeResult<Array2<f32>> {
    concatenate(Axis(0), &[embeds.view(), rows.view()])
        .map_err(|e| RuntimeError::Shape(format!("embedding width mismatch: {e}")))
}

/// Replace the rows of `embeds` at `positions` with consecutive rows of `image`.
pub fn splice_rows(
    embeds: &mut Array2<f32>,
    positions: &[usize],
    image: &Array2<f32>,
) -> RuntimeResult<()> {
    if positions.len() != image.nrows() {
        return Err(RuntimeError::Shape(format!(
            "image produced {} embeddings for {} placeholder tokens",
            image.nrows(),
            positions.len()
        )));
    }
    if embeds.ncols() != image.ncols() {
        return Err(RuntimeError::Shape(format!(
            "image embedding width {} does not match text width {}",
            image.ncols(),
            embeds.ncols()
        )));
    }
    for (&pos, row) in positions.iter().zip(image.rows()) {
        if pos >= embeds.nrows() {
            return Err(RuntimeError::Shape(format!(
                "placeholder position {pos} out of range"
            )));
        }
        embeds.row_mut(pos).assign(&row);
    }
    Ok(())
}

/// Expand each occurrence of `placeholder` in `ids` into all rows of `image`.
pub fn expand_placeholder(
    ids: &[u32],
    text_embeds: &Array2<f32>,
    placeholder: u32,
    image: &Array2<f32>,
) -> RuntimeResult<Array2<f32>> {
    if ids.len() != text_embeds.nrows() {
        return Err(RuntimeError::Shape(format!(
            "{} token ids but {} token embeddings",
            ids.len(),
            text_embeds.nrows()
        )));
    }
    if text_embeds.ncols() != image.ncols() {
        return Err(RuntimeError::Shape(format!(
            "image embedding width {} does not match text width {}",
            image.ncols(),
            text_embeds.ncols()
        )));
    }
    let mut views = Vec::with_capacity(ids.len());
    for (i, &id) in ids.iter().enumerate() {
        if id == placeholder {
            views.push(image.view());
        } else {
            views.push(text_embeds.slice(ndarray::s![i..i + 1, ..]));
        }
    }
    concatenate(Axis(0), &views)
        .map_err(|e| RuntimeError::Shape(format!("failed to expand image tokens: {e}")))
}
