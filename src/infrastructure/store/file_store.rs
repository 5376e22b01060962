use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{FinalArtifact, Verdict};
use crate::domain::ports::ArtifactStore;

const INDEX_FILE: &str = "index.jsonl";

/// One line of the store index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub run_id: Uuid,
    pub topic: String,
    pub verdict: Verdict,
    pub approved: bool,
    pub saved_at: DateTime<Utc>,
}

/// Writes `<dir>/<run_id>.json` (the full artifact), `<dir>/<run_id>.md`
/// (the document) and appends a line to `<dir>/index.jsonl`.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn json_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    pub fn markdown_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.md"))
    }

    /// Read back a stored artifact.
    pub async fn load(&self, run_id: Uuid) -> EngineResult<FinalArtifact> {
        let text = fs::read_to_string(self.json_path(run_id)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// All index entries, oldest first.
    pub async fn index(&self) -> EngineResult<Vec<IndexEntry>> {
        let path = self.dir.join(INDEX_FILE);
        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(path).await?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(EngineError::from))
            .collect()
    }

    /// Write via a temporary file so a crash never leaves a partial artifact.
    async fn write_atomic(path: &Path, contents: &[u8]) -> EngineResult<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    #[instrument(skip(self, artifact), fields(dir = %self.dir.display()))]
    async fn save(&self, run_id: Uuid, topic: &str, artifact: &FinalArtifact) -> EngineResult<()> {
        if artifact.run_id != run_id {
            return Err(EngineError::Store(format!(
                "artifact {} saved under run id {run_id}",
                artifact.run_id
            )));
        }
        fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_vec_pretty(artifact)?;
        Self::write_atomic(&self.json_path(run_id), &json).await?;
        Self::write_atomic(&self.markdown_path(run_id), artifact.document.as_bytes()).await?;

        let entry = IndexEntry {
            run_id,
            topic: topic.to_string(),
            verdict: artifact.verdict,
            approved: artifact.approved,
            saved_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut index = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(INDEX_FILE))
            .await?;
        index.write_all(line.as_bytes()).await?;
        index.flush().await?;

        debug!(%run_id, "artifact written");
        Ok(())
    }
}
