//! Finding image files to describe.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions the image decoder understands, lowercase.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"];

/// Discovers image files in directories.
pub struct FileDiscovery {
    extensions: Vec<String>,
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new(SUPPORTED_EXTENSIONS.iter().map(|ext| ext.to_string()).collect())
    }
}

impl FileDiscovery {
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    /// All supported image files at a path.
    ///
    /// A file path is returned as-is if supported. A directory is walked
    /// recursively. Results are sorted by path.
    pub fn discover(&self, path: &Path) -> Vec<PathBuf> {
        if path.is_file() {
            return if self.is_supported(path) {
                vec![path.to_path_buf()]
            } else {
                vec![]
            };
        }

        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file() && self.is_supported(entry.path()))
            .map(|entry| entry.into_path())
            .collect();

        files.sort();
        files
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext_lower = ext.to_lowercase();
                self.extensions.iter().any(|e| e.to_lowercase() == ext_lower)
            })
            .unwrap_or(false)
    }
}
