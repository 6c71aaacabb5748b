//! Ingot CLI
//!
//! Commands:
//!   run     - Ingest every document under the source prefix
//!   retry   - Re-drive documents from the failed journal
//!   health  - Probe the four external services
//!   status  - Show journal counts without touching any remote

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use ingot::{
    Config, DoclingClient, Journal, OllamaClient, Pipeline, QdrantClient, RunSummary,
    S3ObjectStore,
};

#[derive(Parser)]
#[command(name = "ingot")]
#[command(about = "Document ingestion pipeline: object store to vector store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every document under the configured source prefix
    Run,

    /// Re-drive every document in the failed journal
    Retry,

    /// Probe converter, embedder, vector store and object store
    Health,

    /// Show journal counts
    Status,
}

fn build_pipeline(config: Config) -> Result<Arc<Pipeline>> {
    let journal = Arc::new(Journal::load(&config.log_dir, &config.journal_files)?);
    let store = Arc::new(S3ObjectStore::connect(&config));
    let converter = Arc::new(DoclingClient::new(&config));
    let embedder = Arc::new(OllamaClient::new(&config));
    let vector_store = Arc::new(QdrantClient::new(&config));

    Ok(Arc::new(Pipeline::new(
        config,
        store,
        converter,
        embedder,
        vector_store,
        journal,
    )))
}

/// Cancel the token on the first ctrl-c.
fn install_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "interrupt received, finishing in-flight work".yellow());
            cancel.cancel();
        }
    });
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Run complete".bold());
    println!("  total files:  {}", summary.total_files);
    println!("  new files:    {}", summary.new_files);
    println!("  processed:    {}", summary.processed.to_string().green());
    println!("  skipped:      {}", summary.skipped.to_string().yellow());
    if summary.failed > 0 {
        println!("  failed:       {}", summary.failed.to_string().red());
    } else {
        println!("  failed:       0");
    }
    println!(
        "  duration:     {:.1}s ({:.2} files/s)",
        summary.duration_seconds, summary.files_per_second
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run => {
            let pipeline = build_pipeline(config)?;
            pipeline.preflight().await?;

            let cancel = CancellationToken::new();
            install_ctrl_c(cancel.clone());

            let summary = pipeline.run(cancel).await?;
            print_summary(&summary);

            if !summary.is_clean() {
                eprintln!(
                    "{}",
                    "some documents failed; see the failed journal and `ingot retry`".red()
                );
                std::process::exit(1);
            }
        }

        Commands::Retry => {
            let pipeline = build_pipeline(config)?;
            pipeline.preflight().await?;

            let cancel = CancellationToken::new();
            install_ctrl_c(cancel.clone());

            let report = pipeline.retry_failed(&cancel).await?;
            println!("{}", "Retry complete".bold());
            println!("  attempted:     {}", report.attempted);
            println!("  recovered:     {}", report.recovered.to_string().green());
            println!("  still failing: {}", report.still_failing.to_string().red());
            println!("  missing:       {}", report.missing);

            if report.still_failing > 0 {
                std::process::exit(1);
            }
        }

        Commands::Health => {
            let pipeline = build_pipeline(config)?;
            let mut all_up = true;
            for (name, healthy) in pipeline.health_report().await {
                let status = if healthy {
                    "up".green()
                } else {
                    all_up = false;
                    "down".red()
                };
                println!("  {:<13} {}", name, status);
            }
            if !all_up {
                std::process::exit(1);
            }
        }

        Commands::Status => {
            let journal = Journal::load(&config.log_dir, &config.journal_files)?;
            let counts = journal.counts();
            println!("{}", "Journal status".bold());
            println!("  conversions:      {}", counts.conversion);
            println!("  markdown uploads: {}", counts.markdown_upload);
            println!("  embeddings:       {}", counts.embedding);
            println!("  vector uploads:   {}", counts.vector_upload);
            println!("  skipped:          {}", counts.skipped);
            if counts.failed > 0 {
                println!("  failed:           {}", counts.failed.to_string().red());
            } else {
                println!("  failed:           0");
            }
        }
    }

    Ok(())
}
