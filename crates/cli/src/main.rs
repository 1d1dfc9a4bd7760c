//! Command-line interface for safe staged extraction.
//!
//! Thin dispatch surface over the engine: one extraction per process,
//! Ctrl-C wired to cooperative cancellation, results printed as text or
//! JSON.

use clap::Parser;
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use unarchive_engine::{SandboxPolicy, UnarchiveRequest, Unarchiver};

#[derive(Parser)]
#[command(name = "unarchive")]
#[command(version, about = "Safely extract an archive into a sandboxed destination", long_about = None)]
struct Cli {
    /// Archive file to extract (ZIP or RAR family)
    archive: PathBuf,

    /// Destination directory; created or atomically replaced on success
    #[arg(short, long)]
    out: PathBuf,

    /// Allowed destination roots. May be repeated. Defaults to the
    /// destination's parent directory.
    #[arg(long = "allow-root")]
    allow_roots: Vec<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let allow_roots = if cli.allow_roots.is_empty() {
        vec![cli
            .out
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))]
    } else {
        cli.allow_roots.clone()
    };

    let engine = Unarchiver::new(SandboxPolicy::new(allow_roots));

    // Ctrl-C requests cooperative cancellation; the engine discards
    // staging and leaves the destination untouched.
    {
        let engine = engine.clone();
        let handle = tokio::runtime::Handle::current();
        let result = ctrlc::set_handler(move || {
            let engine = engine.clone();
            handle.spawn(async move {
                let _ = engine.cancel().await;
            });
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "could not install Ctrl-C handler");
        }
    }

    let spinner = if cli.json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_message(format!("Extracting {}", cli.archive.display()));
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    };

    let outcome = engine
        .unarchive(UnarchiveRequest::new(&cli.archive, &cli.out))
        .await;
    spinner.finish_and_clear();

    match outcome {
        Ok(result) => {
            if cli.json {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Error: failed to serialize result: {e}");
                        process::exit(1);
                    }
                }
            } else {
                for file in &result.files {
                    println!("{} ({} bytes)", file.relative_path.display(), file.size);
                }
                println!(
                    "Extracted {} files to {}",
                    result.files.len(),
                    result.output_path.display()
                );
            }
        }
        Err(e) => {
            if cli.json {
                match serde_json::to_string_pretty(&e.to_payload()) {
                    Ok(json) => eprintln!("{json}"),
                    Err(_) => eprintln!("Error [{}]: {}", e.code(), e),
                }
            } else {
                eprintln!("Error [{}]: {}", e.code(), e);
            }
            process::exit(1);
        }
    }
}
