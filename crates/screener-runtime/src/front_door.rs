//! SKU front door: SKU list → ASINs → corpora → one pipeline run per product.
//!
//! Resolution and scraping sit behind traits so the screening path can be
//! driven from files, a catalogue service or a scraper alike. A product whose
//! corpus cannot be fetched is skipped and logged; the remaining products are
//! still screened.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use screener_core::{FinalEntry, ProductCorpus};

use crate::pipeline::{ScreeningError, ScreeningPipeline};
use crate::resilience::LlmUsage;
use crate::runner::RunControl;
use crate::sink::{ArtifactSink, SinkError};

#[derive(Error, Debug)]
pub enum FrontDoorError {
    #[error("Failed to resolve SKUs: {0}")]
    Resolve(String),

    #[error("No corpus for ASIN {asin}: {message}")]
    Corpus { asin: String, message: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Screening failed: {0}")]
    Screening(#[from] ScreeningError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Maps catalogue SKUs to marketplace ASINs.
#[async_trait]
pub trait AsinResolver: Send + Sync {
    /// Resolve `skus`, returning `(sku, asin)` pairs in input order.
    ///
    /// SKUs without an ASIN are left out rather than shifting later pairs.
    async fn resolve(&self, skus: &[String]) -> Result<Vec<(String, String)>, FrontDoorError>;
}

/// Supplies the scraped review corpus of a product.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    async fn fetch(&self, asin: &str) -> Result<ProductCorpus, FrontDoorError>;
}

/// Fixed SKU → ASIN table, typically loaded from a YAML or JSON map.
#[derive(Debug, Clone, Default)]
pub struct StaticAsinResolver {
    table: BTreeMap<String, String>,
}

impl StaticAsinResolver {
    pub fn new(table: BTreeMap<String, String>) -> Self {
        Self { table }
    }

    /// Load a flat `sku: asin` map; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FrontDoorError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| FrontDoorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| FrontDoorError::Resolve(format!("{}: {}", path.display(), e)))?,
            _ => serde_yaml::from_str(&content)
                .map_err(|e| FrontDoorError::Resolve(format!("{}: {}", path.display(), e)))?,
        };
        Ok(Self { table })
    }
}

#[async_trait]
impl AsinResolver for StaticAsinResolver {
    async fn resolve(&self, skus: &[String]) -> Result<Vec<(String, String)>, FrontDoorError> {
        let mut pairs = Vec::with_capacity(skus.len());
        for sku in skus {
            match self.table.get(sku) {
                Some(asin) => pairs.push((sku.clone(), asin.clone())),
                None => tracing::warn!(sku = %sku, "No ASIN for SKU, skipping"),
            }
        }
        Ok(pairs)
    }
}

/// Reads scraped corpora from `<directory>/<asin>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryCorpusSource {
    directory: PathBuf,
}

impl DirectoryCorpusSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl CorpusSource for DirectoryCorpusSource {
    async fn fetch(&self, asin: &str) -> Result<ProductCorpus, FrontDoorError> {
        let path = self.directory.join(format!("{}.json", asin));
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| FrontDoorError::Io {
                path: path.clone(),
                source,
            })?;

        let corpus: ProductCorpus =
            serde_json::from_str(&content).map_err(|e| FrontDoorError::Corpus {
                asin: asin.to_string(),
                message: e.to_string(),
            })?;

        if corpus.asin != asin {
            return Err(FrontDoorError::Corpus {
                asin: asin.to_string(),
                message: format!("{} holds reviews for {}", path.display(), corpus.asin),
            });
        }
        Ok(corpus)
    }
}

/// Outcome of screening a list of SKUs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SkuScreening {
    /// SKU → confirmed non-compliant reviews; SKUs without findings are absent
    pub results: BTreeMap<String, Vec<FinalEntry>>,

    /// SKUs that were resolved but whose corpus could not be fetched
    pub skipped: Vec<String>,

    /// Oracle usage summed over every screened product
    pub usage: LlmUsage,

    pub cancelled: bool,
}

pub struct FrontDoor {
    pipeline: ScreeningPipeline,
    resolver: Box<dyn AsinResolver>,
    source: Box<dyn CorpusSource>,
    sink: Option<Box<dyn ArtifactSink>>,
}

impl FrontDoor {
    pub fn new(
        pipeline: ScreeningPipeline,
        resolver: Box<dyn AsinResolver>,
        source: Box<dyn CorpusSource>,
    ) -> Self {
        Self {
            pipeline,
            resolver,
            source,
            sink: None,
        }
    }

    /// Also write every screened product's artifact through `sink`.
    pub fn with_sink(mut self, sink: Box<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub async fn screen_skus(
        &self,
        skus: &[String],
    ) -> Result<BTreeMap<String, Vec<FinalEntry>>, FrontDoorError> {
        Ok(self.screen_skus_with(skus, &RunControl::new()).await?.results)
    }

    /// Screen every resolvable SKU. Products with no final results are omitted
    /// from the result map.
    pub async fn screen_skus_with(
        &self,
        skus: &[String],
        control: &RunControl,
    ) -> Result<SkuScreening, FrontDoorError> {
        let pairs = self.resolver.resolve(skus).await?;
        tracing::info!(skus = skus.len(), resolved = pairs.len(), "SKUs resolved");

        let mut screening = SkuScreening::default();
        for (sku, asin) in pairs {
            if control.is_cancelled() {
                tracing::info!(sku = %sku, "Run cancelled, remaining SKUs not screened");
                screening.cancelled = true;
                break;
            }

            let corpus = match self.source.fetch(&asin).await {
                Ok(corpus) => corpus,
                Err(e) => {
                    tracing::warn!(sku = %sku, asin = %asin, error = %e, "Corpus unavailable, skipping product");
                    screening.skipped.push(sku);
                    continue;
                }
            };

            let run = self.pipeline.screen_with(&corpus, control).await?;
            screening.usage.merge(&run.usage);
            screening.cancelled |= run.cancelled;
            if let Some(sink) = &self.sink {
                sink.write(&run.asin, &run.final_results).await?;
            }
            if !run.final_results.is_empty() {
                screening.results.insert(sku, run.final_results);
            }
        }

        tracing::info!(
            products = screening.results.len(),
            skipped = screening.skipped.len(),
            tokens = screening.usage.total_tokens,
            llm_calls = screening.usage.llm_calls,
            "SKU screening finished"
        );
        Ok(screening)
    }
}
