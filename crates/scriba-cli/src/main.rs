//! Scriba — scholarly PDF harvester and converter.
//! Entry point for the `scriba` binary.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scriba_common::Config;
use scriba_harvest::workflow::{reset_workspace, HarvestOptions, Harvester};

#[derive(Debug, Parser)]
#[command(
    name = "scriba",
    about = "Scholarly PDF harvester and converter",
    group = clap::ArgGroup::new("input").multiple(false)
)]
struct Args {
    /// Path to a file listing one DOI per line
    #[arg(long, value_name = "FILE", group = "input")]
    dois: Option<PathBuf>,

    /// Path to a file listing one PMID per line
    #[arg(long, value_name = "FILE", group = "input")]
    pmids: Option<PathBuf>,

    /// Path to a file listing one PMC ID per line
    #[arg(long, value_name = "FILE", group = "input")]
    pmcids: Option<PathBuf>,

    /// Path to the CORD-19 metadata csv file
    #[arg(long, value_name = "FILE", group = "input")]
    cord19: Option<PathBuf>,

    /// Path to the config file
    #[arg(long, value_name = "FILE", default_value = "./config.json")]
    config: PathBuf,

    /// Ignore previous processing states and re-init the harvesting from
    /// scratch (asks for confirmation)
    #[arg(long)]
    reset: bool,

    /// Re-process the entries that are not yet complete
    #[arg(long)]
    reprocess: bool,

    /// Process downloaded PDFs with the structuring service into TEI XML
    #[arg(long)]
    grobid: bool,

    /// Generate thumbnail files for the front page of the harvested PDFs
    #[arg(long)]
    thumbnail: bool,

    /// Generate bibliographical annotations with coordinates for the
    /// harvested PDFs
    #[arg(long)]
    annotation: bool,

    /// Perform a full consistency diagnostic on the harvesting process
    #[arg(long)]
    diagnostic: bool,

    /// Write all the consolidated metadata in json to the dump file
    #[arg(long)]
    dump: bool,

    /// Check CORD-19 full-text coverage against the official document
    /// parses directory (requires --cord19)
    #[arg(long, value_name = "DIR")]
    check_coverage: Option<PathBuf>,
}

fn require_file(path: &Path, label: &str) -> anyhow::Result<()> {
    if !path.is_file() {
        anyhow::bail!(
            "error: the indicated {label} file path is not valid: {}",
            path.display()
        );
    }
    Ok(())
}

/// Interactive confirmation for the only destructive operation.
fn confirm_reset() -> bool {
    print!("\nYou asked to reset the existing harvesting, this will remove all the already downloaded data files... are you sure? (y/n) ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim() == "y"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("scriba=debug,info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config).map_err(|e| {
        anyhow::anyhow!("{e}\nCopy config.sample.json to config.json and edit it.")
    })?;

    if let Some(path) = &args.dois {
        require_file(path, "DOI")?;
    }
    if let Some(path) = &args.pmids {
        require_file(path, "PMID")?;
    }
    if let Some(path) = &args.pmcids {
        require_file(path, "PMC ID")?;
    }
    if let Some(path) = &args.cord19 {
        require_file(path, "csv")?;
    }

    if args.reset {
        if confirm_reset() {
            reset_workspace(&config, args.dump)?;
        } else {
            println!("skipping reset...");
        }
    }

    let options = HarvestOptions {
        structure: args.grobid,
        thumbnail: args.thumbnail,
        annotation: args.annotation,
    };
    let harvester = Harvester::new(config, options).await?;
    info!("scriba starting up, version {}", env!("CARGO_PKG_VERSION"));

    let start = Instant::now();
    let mut harvested = false;

    if args.reprocess {
        harvester.reprocess_failed().await?;
        harvested = true;
    } else if let Some(csv) = &args.cord19 {
        // with --check-coverage the csv only feeds the coverage report
        if args.check_coverage.is_none() {
            harvester.harvest_cord19(csv).await?;
            harvested = true;
        }
    } else if let Some(dois) = &args.dois {
        harvester.harvest_dois(dois).await?;
        harvested = true;
    } else if let Some(pmids) = &args.pmids {
        harvester.harvest_pmids(pmids).await?;
        harvested = true;
    } else if let Some(pmcids) = &args.pmcids {
        harvester.harvest_pmcids(pmcids).await?;
        harvested = true;
    }

    if harvested {
        harvester.write_catalogue().await?;
    }

    if args.diagnostic {
        harvester.diagnostic(true, args.cord19.as_deref())?;
    }

    if let Some(documents_dir) = &args.check_coverage {
        let Some(csv) = &args.cord19 else {
            anyhow::bail!("--check-coverage requires --cord19 <metadata csv>");
        };
        harvester.check_coverage(csv, documents_dir)?;
    }

    if args.dump {
        harvester.dump_metadata().await?;
    }

    println!("\nruntime: {:.3} seconds", start.elapsed().as_secs_f64());
    Ok(())
}
