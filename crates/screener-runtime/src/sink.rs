//! Where screening results go.
//!
//! - [`ArtifactSink`] persists one product's final results.
//! - [`ResultPublisher`] hands a whole SKU → results mapping downstream.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use screener_core::FinalEntry;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("ASIN {0:?} cannot name an artifact file")]
    InvalidAsin(String),
}

impl SinkError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persists the final results of one product.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Write the artifact for `asin`, returning where it went.
    async fn write(&self, asin: &str, results: &[FinalEntry]) -> Result<PathBuf, SinkError>;
}

/// Writes `<directory>/<asin>_noncompliant_reviews.json` as a pretty JSON array.
///
/// An existing artifact for the same ASIN is replaced.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    directory: PathBuf,
}

impl JsonFileSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Path of the artifact for `asin`, which must stay inside the directory.
    pub fn artifact_path(&self, asin: &str) -> Result<PathBuf, SinkError> {
        let unsafe_name = asin.trim().is_empty()
            || asin.starts_with('.')
            || asin.contains(['/', '\\', '\0']);
        if unsafe_name {
            return Err(SinkError::InvalidAsin(asin.to_string()));
        }
        Ok(self
            .directory
            .join(format!("{}_noncompliant_reviews.json", asin)))
    }
}

#[async_trait]
impl ArtifactSink for JsonFileSink {
    async fn write(&self, asin: &str, results: &[FinalEntry]) -> Result<PathBuf, SinkError> {
        let path = self.artifact_path(asin)?;
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| SinkError::io(&self.directory, e))?;

        let body = serde_json::to_vec_pretty(results)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| SinkError::io(&path, e))?;

        tracing::info!(asin, results = results.len(), path = %path.display(), "Artifact written");
        Ok(path)
    }
}

/// Downstream channel for SKU → final results.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, results: &BTreeMap<String, Vec<FinalEntry>>) -> Result<(), SinkError>;
}

/// Appends each published mapping to a file as one line of JSON.
#[derive(Debug, Clone)]
pub struct JsonLinesPublisher {
    path: PathBuf,
}

impl JsonLinesPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultPublisher for JsonLinesPublisher {
    async fn publish(&self, results: &BTreeMap<String, Vec<FinalEntry>>) -> Result<(), SinkError> {
        if results.is_empty() {
            tracing::debug!("Nothing to publish");
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::io(parent, e))?;
        }

        let mut line = serde_json::to_vec(results)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SinkError::io(&self.path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| SinkError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| SinkError::io(&self.path, e))?;

        tracing::info!(skus = results.len(), path = %self.path.display(), "Results published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screener_core::{ComplianceResult, Percentage, RevalidatedVerdict, Review};

    fn entry(asin: &str, body: &str) -> FinalEntry {
        FinalEntry::new(
            asin,
            &Review::new("Bad", "1.0 out of 5 stars", body),
            &RevalidatedVerdict {
                result: ComplianceResult::NonCompliant,
                reason: "mentions seller".to_string(),
                percentage_of_relevance: Percentage::parse("20%").unwrap(),
            },
        )
    }

    #[tokio::test]
    async fn test_artifact_written_per_asin() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("nc_reviews"));

        let path = sink
            .write("B01ABC", &[entry("B01ABC", "The seller was rude.")])
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "B01ABC_noncompliant_reviews.json");

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let first = &json[0];
        assert_eq!(first["asin"], "B01ABC");
        assert_eq!(first["body"], "The seller was rude.");
        assert_eq!(first["result"], "non_compliant");
        assert_eq!(first["percentage_of_relevance"], "20%");
    }

    #[tokio::test]
    async fn test_artifact_for_empty_results() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        let path = sink.write("B02", &[]).await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap().trim(), "[]");
    }

    #[tokio::test]
    async fn test_asin_cannot_escape_directory() {
        let root = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(root.path().join("nc_reviews"));

        for asin in ["../x", "a/b", "..\\x", "", ".hidden"] {
            assert!(
                matches!(sink.write(asin, &[]).await, Err(SinkError::InvalidAsin(_))),
                "accepted {asin:?}"
            );
        }
        assert!(!root.path().join("x_noncompliant_reviews.json").exists());
        assert!(!root.path().join("nc_reviews").exists());
    }

    #[tokio::test]
    async fn test_publisher_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = JsonLinesPublisher::new(dir.path().join("out").join("published.jsonl"));

        let mut first = BTreeMap::new();
        first.insert("SKU-1".to_string(), vec![entry("B01", "seller")]);
        publisher.publish(&first).await.unwrap();

        let mut second = BTreeMap::new();
        second.insert("SKU-2".to_string(), vec![entry("B02", "seller again")]);
        publisher.publish(&second).await.unwrap();

        let content = std::fs::read_to_string(publisher.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: BTreeMap<String, Vec<FinalEntry>> = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["SKU-2"][0].asin, "B02");
    }

    #[tokio::test]
    async fn test_publisher_skips_empty_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = JsonLinesPublisher::new(dir.path().join("published.jsonl"));
        publisher.publish(&BTreeMap::new()).await.unwrap();
        assert!(!publisher.path().exists());
    }
}
