//! Gist export: `<root>/<id>/gist.json` plus one file per gist entry.

use async_trait::async_trait;
use path_clean::PathClean;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::descriptor::{GistDescriptor, GistFile};
use crate::error::ExportError;
use crate::github::GitHubApi;
use crate::pool::ItemExporter;

/// Name of the metadata companion file written next to the gist's files.
pub const METADATA_FILE: &str = "gist.json";

/// Result of writing one gist's files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GistFiles {
    pub written: usize,
    pub skipped: usize,
}

pub struct GistExporter {
    api: Arc<dyn GitHubApi>,
    root: PathBuf,
}

impl GistExporter {
    pub fn new(api: Arc<dyn GitHubApi>, root: PathBuf) -> Self {
        Self { api, root }
    }

    /// Write one gist. Only directory creation and metadata failures are
    /// errors; an unreadable file is logged and skipped.
    pub async fn save(&self, gist: &GistDescriptor) -> Result<GistFiles, ExportError> {
        let id = gist
            .id
            .as_deref()
            .filter(|id| is_safe_component(id))
            .ok_or_else(|| ExportError::InvalidDescriptor("gist has no usable id".to_string()))?;

        let gist_dir = self.root.join(id);
        tokio::fs::create_dir_all(&gist_dir)
            .await
            .map_err(|source| ExportError::Write {
                path: gist_dir.clone(),
                source,
            })?;

        self.save_metadata(gist, &gist_dir).await?;

        let mut files = GistFiles::default();
        for (key, file) in &gist.files {
            match self.save_file(id, file, &gist_dir).await {
                Ok(true) => files.written += 1,
                Ok(false) => files.skipped += 1,
                Err(e) => {
                    warn!("Failed to save file {} of gist {}: {}", key, id, e);
                    files.skipped += 1;
                }
            }
        }

        Ok(files)
    }

    async fn save_metadata(&self, gist: &GistDescriptor, gist_dir: &Path) -> Result<(), ExportError> {
        let path = gist_dir.join(METADATA_FILE);
        let metadata = serde_json::to_vec_pretty(gist)?;

        tokio::fs::write(&path, metadata)
            .await
            .map_err(|source| ExportError::Write { path, source })
    }

    /// Returns `Ok(false)` when the entry was skipped without an error.
    async fn save_file(&self, id: &str, file: &GistFile, gist_dir: &Path) -> Result<bool, ExportError> {
        let Some(filename) = file.filename.as_deref() else {
            debug!("Skipping gist file with no filename in gist {}", id);
            return Ok(false);
        };

        let Some(path) = contained_path(gist_dir, filename) else {
            warn!("Skipping gist file {:?} in gist {}: escapes the gist directory", filename, id);
            return Ok(false);
        };

        if Some(&path) == contained_path(gist_dir, METADATA_FILE).as_ref() {
            warn!("Skipping gist file {:?} in gist {}: clashes with the metadata file", filename, id);
            return Ok(false);
        }

        let Some(content) = self.content(id, filename, file).await else {
            return Ok(false);
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ExportError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|source| ExportError::Write { path, source })?;

        Ok(true)
    }

    /// Inline content verbatim, else the bytes behind `raw_url`.
    async fn content(&self, id: &str, filename: &str, file: &GistFile) -> Option<Vec<u8>> {
        if let Some(content) = &file.content {
            return Some(content.clone().into_bytes());
        }

        let Some(raw_url) = file.raw_url.as_deref() else {
            warn!("No content available for {} in gist {}", filename, id);
            return None;
        };

        match self.api.fetch_raw(raw_url).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Failed to fetch content for {} in gist {}: {}", filename, id, e);
                None
            }
        }
    }
}

#[async_trait]
impl ItemExporter<GistDescriptor> for GistExporter {
    async fn export(&self, gist: &GistDescriptor) -> Result<(), ExportError> {
        let files = self.save(gist).await?;
        info!(
            "Successfully backed up gist {} ({} files, {} skipped)",
            gist.id.as_deref().unwrap_or_default(),
            files.written,
            files.skipped
        );
        Ok(())
    }
}

fn is_safe_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

/// Join `filename` under `dir`, refusing anything that lands outside it.
fn contained_path(dir: &Path, filename: &str) -> Option<PathBuf> {
    let relative = Path::new(filename);
    if filename.is_empty() || relative.is_absolute() {
        return None;
    }

    let dir = dir.clean();
    let cleaned = dir.join(relative).clean();
    if cleaned.starts_with(&dir) && cleaned != dir {
        Some(cleaned)
    } else {
        None
    }
}
