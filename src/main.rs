//! regionscan - Map the structure and metadata of an image file.
//!
//! This binary opens the file, runs the scan on a worker thread and prints
//! the region tree (or JSON) to stdout. Logs go to stderr.

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use regionscan::{
    spawn_scan, ByteSource, Config, FileFormat, FileSource, RegionList, ScanOutcome,
};

fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let opened = FileSource::with_capacity(&config.path, config.block_size, config.cache_blocks);
    let source = match opened {
        Ok(source) => source,
        Err(e) => {
            error!("Cannot open {}: {}", config.path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let size = source.size();
    let identifier = source.identifier().to_string();
    debug!(source = %identifier, size, "Opened file");

    let outcome = match spawn_scan(Box::new(source), config.format, config.scan_options())
        .and_then(|handle| handle.join())
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Scan failed to run: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(problem) = outcome.regions.validate(size) {
        warn!("Region list is inconsistent: {}", problem);
    }

    let printed = if config.json {
        print_json(&identifier, size, &outcome, config.pretty)
    } else {
        print!("{}", outcome.regions.render_tree());
        Ok(())
    };
    if let Err(e) = printed {
        error!("Cannot write output: {}", e);
        return ExitCode::FAILURE;
    }

    match outcome.result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}: {}", identifier, e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the default filter.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "regionscan=debug"
    } else {
        "regionscan=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// JSON Output
// =============================================================================

#[derive(Serialize)]
struct Report<'a> {
    source: &'a str,
    size: u64,
    format: Option<FileFormat>,
    error: Option<String>,
    regions: &'a RegionList,
}

fn print_json(
    identifier: &str,
    size: u64,
    outcome: &ScanOutcome,
    pretty: bool,
) -> Result<(), serde_json::Error> {
    let report = Report {
        source: identifier,
        size,
        format: outcome.result.as_ref().ok().copied(),
        error: outcome.result.as_ref().err().map(|e| e.to_string()),
        regions: &outcome.regions,
    };
    let text = if pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", text);
    Ok(())
}
