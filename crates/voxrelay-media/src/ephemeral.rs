//! Turn-scoped scratch storage for inbound audio chunks.
//!
//! Transcription engines read from a file, so every chunk is written to a
//! uniquely named `.wav` file first. The file is removed exactly once: by
//! [`EphemeralChunk::release`] on the normal path, or by `Drop` when the turn
//! unwinds early (engine error, dropped connection, cancelled task).

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub struct EphemeralChunk {
    file: NamedTempFile,
    len: usize,
}

impl EphemeralChunk {
    /// Write `bytes` to a fresh file under `dir` on the blocking pool.
    pub async fn materialize(dir: &Path, bytes: Vec<u8>) -> io::Result<Self> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::materialize_blocking(&dir, &bytes))
            .await
            .map_err(io::Error::other)?
    }

    fn materialize_blocking(dir: &Path, bytes: &[u8]) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("voxrelay-chunk-")
            .suffix(".wav")
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        debug!(path = %file.path().display(), bytes = bytes.len(), "Chunk materialized");
        Ok(Self {
            file,
            len: bytes.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Delete the backing file on the blocking pool. Consumes the chunk so it
    /// cannot be released twice.
    pub async fn release(self) -> io::Result<()> {
        let path: PathBuf = self.file.path().to_path_buf();
        let file = self.file;
        let result = tokio::task::spawn_blocking(move || file.close())
            .await
            .map_err(io::Error::other)
            .and_then(|closed| closed);
        result.inspect_err(|e| {
            warn!(path = %path.display(), %e, "Failed to remove chunk file");
        })
    }
}
