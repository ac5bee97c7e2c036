//! File materialization — streaming writes with caller-chosen
//! overwrite and failure policies.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// What to do when the destination path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Fail the transfer at prepare time if the path exists.
    #[default]
    CreateNew,
    /// Truncate and replace whatever is there.
    Overwrite,
}

/// What to do with a partially written file when the transfer fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Leave the partial artifact in place for inspection or resume.
    #[default]
    Preserve,
    /// Remove the partial artifact.
    Remove,
}

#[derive(Debug)]
pub(crate) struct FileSink {
    file: File,
    path: PathBuf,
    on_failure: FailurePolicy,
}

impl FileSink {
    pub(crate) async fn open(
        path: &Path,
        overwrite: OverwritePolicy,
        on_failure: FailurePolicy,
    ) -> std::io::Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true);
        match overwrite {
            OverwritePolicy::CreateNew => options.create_new(true),
            OverwritePolicy::Overwrite => options.create(true).truncate(true),
        };
        let file = options.open(path).await?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            on_failure,
        })
    }

    pub(crate) async fn write(&mut self, chunk: &Bytes) -> std::io::Result<()> {
        self.file.write_all(chunk).await
    }

    /// Flush and durably sync, returning the written path.
    pub(crate) async fn finish(mut self) -> std::io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.path)
    }

    /// Release the handle after a failed transfer, applying the
    /// partial-artifact policy. Removal errors are logged, not raised:
    /// the transfer already has a failure cause to report.
    pub(crate) async fn discard(self) {
        let FileSink {
            file,
            path,
            on_failure,
        } = self;
        drop(file);
        match on_failure {
            FailurePolicy::Preserve => {
                tracing::warn!(path = %path.display(), "partial file preserved after failed transfer");
            }
            FailurePolicy::Remove => {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove partial file");
                }
            }
        }
    }
}
