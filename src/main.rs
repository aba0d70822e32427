mod aggregate;
mod cache;
mod catalog;
mod error;
mod extract;
mod fetch;
mod geo;
mod ingest;
mod limiter;
mod model;
mod pipeline;
mod region;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::error;

use crate::cache::EnrichmentCache;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "cdn_endpoints", about = "Collect, enrich and catalog CDN edge endpoints")]
struct Cli {
    /// Settings file (default: endpoints.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest all sources, enrich and rewrite the catalog (default)
    Run,
    /// List configured sources
    Sources,
    /// Fetch one source and print what it yields, without touching the catalog
    Probe {
        /// Source name from the settings
        name: String,
    },
    /// Summarise the cache held in the current catalog
    Cache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            println!("Collecting endpoints from {} sources...", settings.sources.len());
            match pipeline::run(&settings).await {
                Ok(summary) => {
                    summary.print();
                    Ok(())
                }
                Err(e) => {
                    error!("Run aborted: {:#}", e);
                    Err(e)
                }
            }
        }
        Commands::Sources => {
            for s in &settings.sources {
                println!(
                    "{:<16} {:<14} {}",
                    s.name,
                    format!("{:?}", s.kind),
                    s.urls.join(", ")
                );
            }
            println!(
                "\ntargets: {} | output: {:?} | prefer_port: {}",
                settings.target_regions.join(", "),
                settings.output,
                settings.prefer_port
            );
            Ok(())
        }
        Commands::Probe { name } => {
            let harvest = pipeline::probe(&settings, &name).await?;
            for item in &harvest.items {
                match &item.tag {
                    Some(tag) => println!("{}#{}#{}", item.endpoint, tag.region, tag.provenance),
                    None => println!("{}", item.endpoint),
                }
            }
            println!(
                "\n{} endpoints ({} tagged), {} failed urls",
                harvest.items.len(),
                harvest.tagged(),
                harvest.failed_urls.len()
            );
            Ok(())
        }
        Commands::Cache => {
            let cache = EnrichmentCache::load(&settings.output);
            if cache.is_empty() {
                println!("No cached endpoints in {:?}", settings.output);
                return Ok(());
            }
            let mut by_region = std::collections::BTreeMap::<&str, usize>::new();
            for (_, e) in cache.iter() {
                *by_region.entry(e.region.as_str()).or_default() += 1;
            }
            for (region, n) in &by_region {
                println!("{:<24} {:>5}", region, n);
            }
            println!("\n{} cached endpoints in {:?}", cache.len(), settings.output);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
