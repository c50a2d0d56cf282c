//! `screener`: command-line front end for review compliance screening.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use screener_core::{BatchSize, ComplianceResult, InitialVerdict, Policy, ProductCorpus};
use screener_runtime::{
    initial_request, reverify_request, ArtifactSink, DirectoryCorpusSource, FrontDoor,
    JsonFileSink, JsonLinesPublisher, OracleRequest, ProviderRegistry, ResultPublisher,
    RunControl, ScreenerConfig, ScreeningPipeline, StaticAsinResolver,
};

use cli::{Cli, Commands, StageArg};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Screen {
            corpora,
            output_dir,
            no_artifacts,
            json,
        } => {
            let directory = output_dir.unwrap_or_else(|| config.output.directory.clone());
            let sink = (!no_artifacts).then(|| JsonFileSink::new(directory));
            screen(&config, &corpora, sink.as_ref(), json).await
        }
        Commands::ScreenSkus {
            skus,
            asin_map,
            corpus_dir,
            publish,
        } => {
            let publish = publish.or_else(|| config.output.publish_path.clone());
            screen_skus(&config, &skus, &asin_map, &corpus_dir, publish).await
        }
        Commands::Policy { path } => {
            let policy = match path {
                Some(path) => Policy::from_file(&path)
                    .with_context(|| format!("Invalid policy {}", path.display()))?,
                None => config.load_policy()?,
            };
            println!("# {} (version {})", policy.name, policy.policy_version);
            println!();
            print!("{}", policy.render());
            Ok(())
        }
        Commands::Prompt { corpus, stage } => {
            let corpus = read_corpus(&corpus)?;
            let policy = config.load_policy()?;
            let size = match stage {
                StageArg::Initial => config.batching.initial_batch_size,
                StageArg::Reverify => config.batching.reverify_batch_size,
            };
            match first_request(&policy, &corpus, stage, size) {
                Some(request) => {
                    println!("[system]\n{}\n\n[user]\n{}", request.system, request.prompt);
                }
                None => eprintln!("{} has no reviews", corpus.asin),
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ScreenerConfig> {
    match path {
        Some(path) => ScreenerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(ScreenerConfig::default()),
    }
}

fn read_corpus(path: &Path) -> Result<ProductCorpus> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid corpus {}", path.display()))
}

/// Cancel the run on Ctrl-C; in-flight batches still complete.
fn cancel_on_ctrl_c() -> RunControl {
    let control = RunControl::new();
    let handle = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight batches");
            handle.cancel();
        }
    });
    control
}

fn build_pipeline(config: &ScreenerConfig) -> Result<ScreeningPipeline> {
    ScreeningPipeline::from_config(config, &ProviderRegistry::with_defaults())
        .context("Failed to set up screening pipeline")
}

async fn screen(
    config: &ScreenerConfig,
    corpora: &[PathBuf],
    sink: Option<&JsonFileSink>,
    json: bool,
) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let control = cancel_on_ctrl_c();

    for path in corpora {
        if control.is_cancelled() {
            break;
        }
        let corpus = read_corpus(path)?;
        let run = pipeline.screen_with(&corpus, &control).await?;

        if let Some(sink) = sink {
            sink.write(&run.asin, &run.final_results).await?;
        }

        if json {
            println!("{}", serde_json::to_string_pretty(&run)?);
        } else {
            println!(
                "{}: {} non-compliant of {} reviews ({} unresolved, {} tokens, ${:.4}, {:.1}s){}",
                run.asin,
                run.final_results.len(),
                run.outcomes.len(),
                run.unresolved().len(),
                run.total_tokens,
                run.usage.estimated_cost,
                run.total_time.as_secs_f64(),
                if run.cancelled { " [cancelled]" } else { "" }
            );
        }
    }

    Ok(())
}

async fn screen_skus(
    config: &ScreenerConfig,
    skus: &[String],
    asin_map: &Path,
    corpus_dir: &Path,
    publish: Option<PathBuf>,
) -> Result<()> {
    let resolver = StaticAsinResolver::from_file(asin_map)?;
    let door = FrontDoor::new(
        build_pipeline(config)?,
        Box::new(resolver),
        Box::new(DirectoryCorpusSource::new(corpus_dir)),
    )
    .with_sink(Box::new(JsonFileSink::new(config.output.directory.clone())));

    let control = cancel_on_ctrl_c();
    let screening = door.screen_skus_with(skus, &control).await?;
    println!("{}", serde_json::to_string_pretty(&screening.results)?);
    eprintln!(
        "{} of {} SKUs with findings ({} skipped, {} tokens, ${:.4}){}",
        screening.results.len(),
        skus.len(),
        screening.skipped.len(),
        screening.usage.total_tokens,
        screening.usage.estimated_cost,
        if screening.cancelled { " [cancelled]" } else { "" }
    );

    if let Some(path) = publish {
        JsonLinesPublisher::new(path).publish(&screening.results).await?;
    }
    Ok(())
}

/// The request the first window of `stage` would send.
///
/// For re-verification every review is treated as flagged, since no initial
/// verdicts exist without calling the oracle.
fn first_request(
    policy: &Policy,
    corpus: &ProductCorpus,
    stage: StageArg,
    size: BatchSize,
) -> Option<OracleRequest> {
    let window = &corpus.reviews[..corpus.reviews.len().min(size.get())];
    if window.is_empty() {
        return None;
    }

    Some(match stage {
        StageArg::Initial => {
            let reviews: Vec<_> = window.iter().collect();
            initial_request(policy, &reviews)
        }
        StageArg::Reverify => {
            let verdict = InitialVerdict {
                result: ComplianceResult::NonCompliant,
                reason: "flagged by the initial pass".to_string(),
            };
            let items: Vec<_> = window.iter().map(|r| (r, &verdict)).collect();
            reverify_request(policy, &items)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use screener_core::Review;

    fn corpus(n: usize) -> ProductCorpus {
        ProductCorpus::new(
            "B0CLI",
            (0..n)
                .map(|i| Review::new("t", "4.0 out of 5 stars", format!("body {i}")))
                .collect(),
        )
    }

    #[test]
    fn test_first_request_limited_to_batch() {
        let request = first_request(
            &Policy::marketplace_default(),
            &corpus(30),
            StageArg::Initial,
            BatchSize::DEFAULT,
        )
        .unwrap();
        assert_eq!(request.item_count, 25);
        assert!(request.prompt.contains("Review: 25\n"));
        assert!(!request.prompt.contains("Review: 26\n"));
    }

    #[test]
    fn test_first_request_reverify() {
        let request = first_request(
            &Policy::marketplace_default(),
            &corpus(2),
            StageArg::Reverify,
            BatchSize::DEFAULT,
        )
        .unwrap();
        assert_eq!(request.item_count, 2);
        assert!(request.prompt.contains("Result: no"));
    }

    #[test]
    fn test_first_request_empty_corpus() {
        assert!(first_request(
            &Policy::marketplace_default(),
            &corpus(0),
            StageArg::Initial,
            BatchSize::DEFAULT
        )
        .is_none());
    }

    #[test]
    fn test_read_corpus_accepts_scraper_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("B0CLI.json");
        std::fs::write(
            &path,
            r#"{"asin": "B0CLI", "product title": "Blender", "reviews": [{"title": "ok", "rating": "4.0 out of 5 stars", "body": "Works."}]}"#,
        )
        .unwrap();

        let corpus = read_corpus(&path).unwrap();
        assert_eq!(corpus.product_title.as_deref(), Some("Blender"));
        assert_eq!(corpus.reviews.len(), 1);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        assert!(load_config(Some(Path::new("/nonexistent/screener.yaml"))).is_err());
        assert!(load_config(None).is_ok());
    }
}
