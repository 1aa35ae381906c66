//! Persistence of generated programs.
//!
//! Every attempt is written to a fresh `game_{yyyyMMdd_HHmmss}_{token}.pl`
//! file. The random token keeps concurrent requests within the same second
//! apart; files are opened create-new so an unlucky collision retries with a
//! new token instead of overwriting another request's artifact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const ARTIFACT_EXTENSION: &str = "pl";

const MAX_NAME_ATTEMPTS: usize = 8;

/// Directory of generated program files. Never deletes anything.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `source` to a new uniquely named file and return its path.
    pub async fn persist(&self, source: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create output dir {}", self.dir.display()))?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self
                .dir
                .join(artifact_name(&Local::now(), rand::random::<u32>()));
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    warn!(path = %path.display(), "artifact name collision, retrying");
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("create {}", path.display()));
                }
            };
            file.write_all(source.as_bytes())
                .await
                .with_context(|| format!("write {}", path.display()))?;
            file.flush()
                .await
                .with_context(|| format!("flush {}", path.display()))?;
            debug!(path = %path.display(), bytes = source.len(), "persisted program");
            return Ok(path);
        }

        Err(anyhow!(
            "could not find a free artifact name in {} after {MAX_NAME_ATTEMPTS} attempts",
            self.dir.display()
        ))
    }
}

fn artifact_name(now: &DateTime<Local>, token: u32) -> String {
    format!(
        "game_{}_{token:08x}.{ARTIFACT_EXTENSION}",
        now.format("%Y%m%d_%H%M%S")
    )
}
