//! Merging of a job's downloaded artifacts into one deliverable.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::MergeError;

/// Written when a job produced no artifacts at all.
pub const PLACEHOLDER: &[u8] = b"No results found\n";

#[async_trait]
pub trait DocumentCombiner: Send + Sync {
    /// Merge every artifact in `artifact_dir` into `output`.
    async fn combine(&self, artifact_dir: &Path, output: &Path) -> Result<PathBuf, MergeError>;
}

/// Concatenates artifacts in file-name order.
///
/// Files that cannot be read are skipped; the rest are still merged.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatCombiner;

impl ConcatCombiner {
    async fn artifact_files(dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MergeError::ReadDir(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(MergeError::ReadDir)? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl DocumentCombiner for ConcatCombiner {
    async fn combine(&self, artifact_dir: &Path, output: &Path) -> Result<PathBuf, MergeError> {
        let files = Self::artifact_files(artifact_dir).await?;

        let merged = if files.is_empty() {
            info!(dir = %artifact_dir.display(), "No artifacts to merge, writing placeholder");
            PLACEHOLDER.to_vec()
        } else {
            let mut merged = Vec::new();
            for file in &files {
                match tokio::fs::read(file).await {
                    Ok(bytes) => merged.extend_from_slice(&bytes),
                    Err(e) => warn!(file = %file.display(), error = %e, "Skipping unreadable artifact"),
                }
            }
            merged
        };

        let write_err = |source| MergeError::Write {
            path: output.display().to_string(),
            source,
        };
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(output, &merged).await.map_err(write_err)?;

        debug!(files = files.len(), bytes = merged.len(), output = %output.display(), "Artifacts merged");
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merges_in_name_order() {
        let staging = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        std::fs::write(staging.path().join("A0002.pdf"), b"two;").unwrap();
        std::fs::write(staging.path().join("A0001.pdf"), b"one;").unwrap();
        std::fs::create_dir(staging.path().join("nested")).unwrap();

        let output = out_dir.path().join("merged").join("Merged_result_x.pdf");
        let path = ConcatCombiner.combine(staging.path(), &output).await.unwrap();

        assert_eq!(path, output);
        assert_eq!(std::fs::read(&output).unwrap(), b"one;two;");
    }

    #[tokio::test]
    async fn empty_directory_yields_placeholder() {
        let staging = tempfile::tempdir().unwrap();
        let output = staging.path().join("out.pdf");
        let missing = staging.path().join("never-created");

        ConcatCombiner.combine(&missing, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), PLACEHOLDER);
    }

    #[tokio::test]
    async fn unwritable_output_is_merge_error() {
        let staging = tempfile::tempdir().unwrap();
        let blocker = staging.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let err = ConcatCombiner
            .combine(staging.path(), &blocker.join("out.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Write { .. }));
    }
}
