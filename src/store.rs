use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::config::Settings;
use crate::domain::{Encoding, ImageKey, Username};
use crate::mapillary::THUMBNAIL_VARIANT;

/// Local layout for saved sequences and downloaded thumbnails.
#[derive(Debug, Clone)]
pub struct Store {
    output_dir: Utf8PathBuf,
    image_dir: Utf8PathBuf,
}

impl Store {
    pub fn new(settings: &Settings) -> Self {
        Self::new_with_paths(settings.output_dir.clone(), settings.image_dir.clone())
    }

    pub fn new_with_paths(output_dir: Utf8PathBuf, image_dir: Utf8PathBuf) -> Self {
        Self {
            output_dir,
            image_dir,
        }
    }

    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    pub fn image_dir(&self) -> &Utf8Path {
        &self.image_dir
    }

    pub fn sequences_path(&self, username: &Username, encoding: Encoding) -> Utf8PathBuf {
        self.output_dir
            .join(format!("{}_sequences.{}", username, encoding.extension()))
    }

    pub fn thumbnail_path(&self, key: &ImageKey) -> Utf8PathBuf {
        self.image_dir
            .join(format!("{}_{}", key.as_str(), THUMBNAIL_VARIANT))
    }

    pub fn ensure_image_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.image_dir.as_std_path())
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    /// Writes `content` next to `path` and renames it into place.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> std::io::Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent.as_std_path())?;
        let mut temp = Builder::new()
            .prefix(".callisto")
            .tempfile_in(parent.as_std_path())?;
        temp.write_all(content)?;
        temp.persist(path.as_std_path()).map_err(|err| err.error)?;
        Ok(())
    }
}
