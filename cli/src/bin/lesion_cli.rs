use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use cli::{CliError, analyze_file, load_config, schema_json, segment_file};
use color_eyre::eyre::Result;
use lesion::{Pipeline, SchemaKind};
use strum::VariantNames;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pipeline configuration (.toml or .json); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment a lesion image and measure its shape
    Segment {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,
        /// Directory for PNG artifacts and report.json
        #[arg(short, long)]
        output_dir: PathBuf,
    },
    /// Full analysis: diagnosis, Grad-CAM++ heatmap and segmentation
    Analyze {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,
        /// Recorded classifier trace (JSON)
        #[arg(short, long)]
        trace: PathBuf,
        /// Directory for PNG artifacts and report.json
        #[arg(short, long)]
        output_dir: PathBuf,
        /// Explain this class instead of the predicted one
        #[arg(long)]
        class_index: Option<usize>,
    },
    /// Print a JSON schema
    Schema {
        /// response, segmentation, error or config
        #[arg(value_parser = parse_schema_kind)]
        kind: SchemaKind,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Segment { input, output_dir } => {
            let pipeline = build_pipeline(cli.config.as_deref())?;
            let response = report_failure(segment_file(&pipeline, input, output_dir))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Analyze {
            input,
            trace,
            output_dir,
            class_index,
        } => {
            let pipeline = build_pipeline(cli.config.as_deref())?;
            let response = report_failure(analyze_file(&pipeline, trace, input, *class_index, output_dir))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Schema { kind } => {
            println!("{}", schema_json(*kind)?);
        }
        Commands::DefaultConfig => {
            println!("{}", lesion::PipelineConfig::default().to_toml()?);
        }
    }

    Ok(())
}

fn parse_schema_kind(value: &str) -> std::result::Result<SchemaKind, String> {
    value
        .parse()
        .map_err(|_| format!("expected one of: {}", SchemaKind::VARIANTS.join(", ")))
}

fn build_pipeline(config: Option<&Path>) -> Result<Pipeline> {
    let config = load_config(config)?;
    let pipeline = Pipeline::from_config(&config)?;
    info!("{}", pipeline.info());
    Ok(pipeline)
}

/// Print the `{ "error": ... }` body for analysis failures before bailing out.
fn report_failure<T>(result: std::result::Result<T, CliError>) -> Result<T> {
    result.map_err(|e| {
        if let Some(body) = e.error_body() {
            match serde_json::to_string(&body) {
                Ok(json) => println!("{json}"),
                Err(ser) => error!("could not serialize error body: {ser}"),
            }
        }
        e.into()
    })
}
