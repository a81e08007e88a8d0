//! Chat templates rendered with minijinja.
//!
//! The template is read from the model directory: `chat_template.json`
//! first, then the `chat_template` key of `tokenizer_config.json`. Models
//! that ship neither use the Mistral instruction format.

use std::path::Path;

use minijinja::{context, Environment, Value};
use serde::Serialize;

use crate::backend::{ChatTurn, ContentPart, Role};
use crate::error::{RuntimeError, RuntimeResult};

pub const CHAT_TEMPLATE_FILE: &str = "chat_template.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Mistral `[INST] ... [/INST]` format. Images come before text in a turn.
pub const MISTRAL_TEMPLATE: &str = r#"
{%- for message in messages -%}
  {%- if message['role'] == 'user' -%}
    {{- '[INST] ' -}}
    {%- for part in message['content'] -%}
      {%- if part['type'] == 'image' -%}{{- '<image>\n' -}}{%- endif -%}
    {%- endfor -%}
    {%- for part in message['content'] -%}
      {%- if part['type'] == 'text' -%}{{- part['text'] -}}{%- endif -%}
    {%- endfor -%}
    {{- ' [/INST]' -}}
  {%- elif message['role'] == 'assistant' -%}
    {{- ' ' -}}
    {%- for part in message['content'] -%}
      {%- if part['type'] == 'text' -%}{{- part['text'] -}}{%- endif -%}
    {%- endfor -%}
    {{- eos_token -}}
  {%- endif -%}
{%- endfor -%}
"#;

/// A Jinja chat template plus the special tokens it may reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTemplate {
    source: String,
    bos_token: String,
    eos_token: String,
}

/// Conversation turn in the shape Hugging Face templates expect.
#[derive(Serialize)]
struct TemplateMessage<'a> {
    role: &'static str,
    content: Vec<TemplatePart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TemplatePart<'a> {
    Image,
    Text { text: &'a str },
}

impl<'a> From<&'a ChatTurn> for TemplateMessage<'a> {
    fn from(turn: &'a ChatTurn) -> Self {
        Self {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: turn
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Image => TemplatePart::Image,
                    ContentPart::Text(text) => TemplatePart::Text {
                        text: text.as_str(),
                    },
                })
                .collect(),
        }
    }
}

impl ChatTemplate {
    pub fn new(
        source: impl Into<String>,
        bos_token: impl Into<String>,
        eos_token: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        }
    }

    pub fn mistral() -> Self {
        Self::new(MISTRAL_TEMPLATE, "<s>", "</s>")
    }

    /// Template shipped in `dir`, or `None` if the model has none.
    pub fn load(dir: &Path) -> RuntimeResult<Option<Self>> {
        let tokenizer_config = read_json(&dir.join(TOKENIZER_CONFIG_FILE))?;
        let standalone = read_json(&dir.join(CHAT_TEMPLATE_FILE))?;

        let source = standalone
            .as_ref()
            .and_then(template_source)
            .or_else(|| tokenizer_config.as_ref().and_then(template_source));
        let Some(source) = source else {
            return Ok(None);
        };

        let token = |key: &str| {
            tokenizer_config
                .as_ref()
                .and_then(|config| config.get(key))
                .and_then(token_value)
                .unwrap_or_default()
        };
        let template = Self::new(source, token("bos_token"), token("eos_token"));
        template.compile_check()?;
        Ok(Some(template))
    }

    /// Render `conversation`; `add_generation_prompt` is passed to the template.
    pub fn render(
        &self,
        conversation: &[ChatTurn],
        add_generation_prompt: bool,
    ) -> RuntimeResult<String> {
        let env = environment();
        let template = env
            .template_from_str(&self.source)
            .map_err(|e| RuntimeError::Template(e.to_string()))?;
        let messages: Vec<TemplateMessage<'_>> =
            conversation.iter().map(TemplateMessage::from).collect();

        template
            .render(context! {
                messages => messages,
                bos_token => self.bos_token.as_str(),
                eos_token => self.eos_token.as_str(),
                add_generation_prompt => add_generation_prompt,
            })
            .map_err(|e| RuntimeError::Template(e.to_string()))
    }

    fn compile_check(&self) -> RuntimeResult<()> {
        environment()
            .template_from_str(&self.source)
            .map(|_| ())
            .map_err(|e| RuntimeError::Template(e.to_string()))
    }
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    // Hugging Face templates validate role order with this.
    env.add_function("raise_exception", raise_exception);
    env
}

fn raise_exception(message: String) -> Result<Value, minijinja::Error> {
    Err(minijinja::Error::new(
        minijinja::ErrorKind::InvalidOperation,
        message,
    ))
}

fn read_json(path: &Path) -> RuntimeResult<Option<serde_json::Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| RuntimeError::Template(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| RuntimeError::Template(format!("{}: {e}", path.display())))
}

/// `chat_template` as a string, or the `default` entry of a named list.
fn template_source(config: &serde_json::Value) -> Option<String> {
    match config.get("chat_template")? {
        serde_json::Value::String(source) => Some(source.clone()),
        serde_json::Value::Array(named) => named
            .iter()
            .find(|entry| entry.get("name").and_then(|n| n.as_str()) == Some("default"))
            .and_then(|entry| entry.get("template"))
            .and_then(|t| t.as_str())
            .map(str::to_string),
        _ => None,
    }
}

/// Special tokens are either plain strings or `{"content": ...}` objects.
fn token_value(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .or_else(|| value.get("content").and_then(|c| c.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(text: &str) -> ChatTurn {
        ChatTurn {
            role: Role::Assistant,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    #[test]
    fn test_mistral_single_user_turn() {
        let conversation = [ChatTurn::user_with_image("What is shown in this image?")];
        assert_eq!(
            ChatTemplate::mistral().render(&conversation, true).unwrap(),
            "[INST] <image>\nWhat is shown in this image? [/INST]"
        );
    }

    #[test]
    fn test_mistral_multi_turn() {
        let conversation = [
            ChatTurn::user_with_image("What is this?"),
            assistant("A bicycle."),
            ChatTurn {
                role: Role::User,
                content: vec![ContentPart::Text("What color?".into())],
            },
        ];
        assert_eq!(
            ChatTemplate::mistral().render(&conversation, true).unwrap(),
            "[INST] <image>\nWhat is this? [/INST] A bicycle.</s>[INST] What color? [/INST]"
        );
    }

    #[test]
    fn test_generation_prompt_reaches_template() {
        let template = ChatTemplate::new(
            "{% for m in messages %}<{{ m.role }}>{% endfor %}\
             {% if add_generation_prompt %}<assistant>{% endif %}",
            "",
            "",
        );
        let conversation = [ChatTurn::user_with_image("hi")];
        assert_eq!(template.render(&conversation, true).unwrap(), "<user><assistant>");
        assert_eq!(template.render(&conversation, false).unwrap(), "<user>");
    }

    #[test]
    fn test_load_prefers_chat_template_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(TOKENIZER_CONFIG_FILE),
            r#"{"chat_template": "from config", "bos_token": {"content": "<s>"}, "eos_token": "</s>"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(CHAT_TEMPLATE_FILE),
            r#"{"chat_template": "{{ bos_token }}{{ messages[0].content[1].text }}{{ eos_token }}"}"#,
        )
        .unwrap();

        let template = ChatTemplate::load(dir.path()).unwrap().unwrap();
        let rendered = template
            .render(&[ChatTurn::user_with_image("caption")], true)
            .unwrap();
        assert_eq!(rendered, "<s>caption</s>");
    }

    #[test]
    fn test_load_reads_tokenizer_config_and_named_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(TOKENIZER_CONFIG_FILE),
            r#"{"chat_template": [
                {"name": "tool_use", "template": "tools"},
                {"name": "default", "template": "{{ messages | length }}"}
            ]}"#,
        )
        .unwrap();

        let template = ChatTemplate::load(dir.path()).unwrap().unwrap();
        assert_eq!(
            template.render(&[ChatTurn::user_with_image("x")], true).unwrap(),
            "1"
        );
    }

    #[test]
    fn test_load_without_template() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ChatTemplate::load(dir.path()).unwrap(), None);

        std::fs::write(dir.path().join(TOKENIZER_CONFIG_FILE), r#"{"eos_token": "</s>"}"#).unwrap();
        assert_eq!(ChatTemplate::load(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_load_rejects_broken_template() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CHAT_TEMPLATE_FILE),
            r#"{"chat_template": "{% for m in messages %}"}"#,
        )
        .unwrap();
        assert!(matches!(
            ChatTemplate::load(dir.path()),
            Err(RuntimeError::Template(_))
        ));
    }

    #[test]
    fn test_raise_exception_fails_render() {
        let template = ChatTemplate::new("{{ raise_exception('roles must alternate') }}", "", "");
        let err = template.render(&[ChatTurn::user_with_image("x")], true).unwrap_err();
        assert!(err.to_string().contains("roles must alternate"));
    }
}
