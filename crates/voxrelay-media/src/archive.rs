//! Best-effort archive of synthesized replies.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

/// Append-only directory of synthesized audio.
///
/// File names combine a UTC timestamp with the session id and turn number,
/// so concurrent sessions never collide. Each file is written to a hidden
/// temp file in the same directory and renamed into place, so a reader never
/// observes a partial file.
#[derive(Debug, Clone)]
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(session_id: &str, turn: u64, at: DateTime<Utc>) -> String {
        format!(
            "{}_{session_id}_{turn:06}.wav",
            at.format("%Y%m%dT%H%M%S%.3fZ")
        )
    }

    /// Persist `audio` and return its final path.
    pub async fn store(&self, session_id: &str, turn: u64, audio: &[u8]) -> io::Result<PathBuf> {
        let target = self
            .dir
            .join(Self::file_name(session_id, turn, Utc::now()));
        let dir = self.dir.clone();
        let audio = audio.to_vec();

        tokio::task::spawn_blocking(move || -> io::Result<PathBuf> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&audio)?;
            tmp.flush()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            debug!(path = %target.display(), bytes = audio.len(), "Reply archived");
            Ok(target)
        })
        .await
        .map_err(io::Error::other)?
    }
}
