//! Archive extraction seam and the `tar` implementation.

use std::path::Path;

use tracing::debug;

use crate::BoxFuture;
use crate::command::{EnvMode, run_command};
use crate::error::ProcessResult;

/// Capability interface over the archive extractor.
pub trait ArchiveExtractor: Send + Sync {
    /// Unpack `archive` into the existing directory `target`.
    fn extract<'a>(&'a self, archive: &'a Path, target: &'a Path) -> BoxFuture<'a, ProcessResult<()>>;
}

/// Extracts gzip-compressed tarballs with the system `tar`.
///
/// No timeout of its own: the deploy pipeline bounds the call and the child
/// is killed when the future is dropped.
#[derive(Debug, Clone)]
pub struct TarExtractor {
    bin: String,
}

impl TarExtractor {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

impl ArchiveExtractor for TarExtractor {
    fn extract<'a>(&'a self, archive: &'a Path, target: &'a Path) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            let archive_arg = archive.to_string_lossy();
            let target_arg = target.to_string_lossy();
            run_command(
                &self.bin,
                &["-xzf", archive_arg.as_ref(), "-C", target_arg.as_ref()],
                None,
                EnvMode::Inherit,
                None,
            )
            .await?;
            debug!(archive = %archive.display(), target = %target.display(), "archive extracted");
            Ok(())
        })
    }
}
