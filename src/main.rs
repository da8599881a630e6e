use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use driftguard::config::Config;
use driftguard::model::store::ModelStore;
use driftguard::model::BaselineModel;
use driftguard::{detect, features, normalize};

#[derive(Parser)]
#[command(
    name = "driftguard",
    about = "Security drift detection for CI/CD pipelines",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + analysis store)
    Serve {
        /// Listen port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Train a baseline model from pipeline-log files
    Train {
        /// Baseline log files (at least 2)
        #[arg(required = true)]
        logs: Vec<PathBuf>,

        /// Model name (defaults to the shared baseline model)
        #[arg(long)]
        model: Option<String>,

        /// Merge into the existing model instead of overwriting it
        #[arg(long)]
        retrain: bool,
    },

    /// Analyze one pipeline log against the trained baseline
    Analyze {
        /// Pipeline log file (JSON)
        file: PathBuf,

        /// Override the pipeline name extracted from the log
        #[arg(long)]
        pipeline: Option<String>,

        /// Model name to score against
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.port = port;
            }
            tracing::info!(port = config.port, "Starting driftguard daemon");
            driftguard::serve(config).await?;
        }
        Commands::Train {
            logs,
            model,
            retrain,
        } => {
            let vectors = read_vectors(&logs)?;
            if vectors.len() < 2 {
                anyhow::bail!(
                    "at least 2 valid baseline logs are required, got {}",
                    vectors.len()
                );
            }

            let store = ModelStore::new(config.model_dir);
            let name = model.as_deref();
            let trained = if retrain && store.exists(name) {
                store.load(name)?.merge(&vectors, name.unwrap_or("default"))?
            } else {
                BaselineModel::train(&vectors, name.unwrap_or("default"))?
            };
            let path = store.save(&trained, name)?;

            println!(
                "Trained baseline from {} runs -> {}",
                trained.baseline_run_count,
                path.display()
            );
        }
        Commands::Analyze {
            file,
            pipeline,
            model,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let mut run = normalize::normalize(&content)?;
            if let Some(pipeline) = pipeline {
                run.pipeline = pipeline;
            }

            let vector = features::extract(&run)?;
            let store = ModelStore::new(config.model_dir);
            let baseline = store.load(model.as_deref())?;

            let mut analysis = detect::detect(&vector, &baseline, &run.pipeline)?;
            analysis.parsed_steps = run.steps;

            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
    }

    Ok(())
}

fn read_vectors(paths: &[PathBuf]) -> Result<Vec<features::FeatureVector>> {
    let mut vectors = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let run = normalize::normalize(&content)
            .with_context(|| format!("failed to normalize {}", path.display()))?;
        let vector = features::extract(&run)?;
        tracing::info!(file = %path.display(), pipeline = %run.pipeline, "processed baseline log");
        vectors.push(vector);
    }
    Ok(vectors)
}
