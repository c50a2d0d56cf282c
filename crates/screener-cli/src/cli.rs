//! Command-line argument parsing.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Two-stage compliance screening of product reviews
#[derive(Parser, Debug)]
#[command(name = "screener")]
#[command(about = "Screen product reviews against marketplace community guidelines", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Screener config file (YAML or JSON)
    #[arg(long, short, global = true, env = "SCREENER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Screen scraped corpus files (`{asin, reviews}` JSON)
    Screen {
        /// Corpus files
        #[arg(required = true)]
        corpora: Vec<PathBuf>,

        /// Artifact directory (overrides output.directory)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Do not write artifacts
        #[arg(long)]
        no_artifacts: bool,

        /// Print the full run (telemetry and outcomes) as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve SKUs to ASINs, screen each product and print SKU → results
    ScreenSkus {
        /// SKU to screen (repeatable)
        #[arg(long = "sku", required = true)]
        skus: Vec<String>,

        /// Flat `sku: asin` map (YAML or JSON)
        #[arg(long)]
        asin_map: PathBuf,

        /// Directory holding `<asin>.json` corpus files
        #[arg(long)]
        corpus_dir: PathBuf,

        /// Append the results to this JSON-lines file (overrides output.publish_path)
        #[arg(long)]
        publish: Option<PathBuf>,
    },

    /// Validate a policy document and print its rendered text
    Policy {
        /// Policy file; the configured or built-in policy when omitted
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Render the first request of a stage without calling the oracle
    Prompt {
        /// Corpus file
        corpus: PathBuf,

        #[arg(long, value_enum, default_value_t = StageArg::Initial)]
        stage: StageArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageArg {
    Initial,
    Reverify,
}
