use anyhow::Result;
use clap::Parser;
use parse_bundle::{BundleSource, Options};
use std::io;

/// Extract charms and their revisions from a Juju bundle.
#[derive(Parser)]
#[clap(name = "parse-bundle", version)]
struct Cli {
    /// Parse bundle from FILE. If specifying `-` then read from standard input.
    #[clap(parse(from_os_str))]
    file: std::path::PathBuf,

    /// Get charms and their revisions from bundle.
    #[clap(long)]
    get_charms: bool,
}

fn install_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // stdout carries the charm list, keep diagnostics off it
    let fmt_layer = fmt::layer().with_target(false).with_writer(io::stderr);
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();
    install_tracing();

    let source = BundleSource::new(&args.file);
    let options = Options {
        get_charms: args.get_charms,
    };
    let stdout = io::stdout();
    let stderr = io::stderr();
    let found =
        parse_bundle::process_source(&source, &options, &mut stdout.lock(), &mut stderr.lock())?;
    tracing::debug!(source = %source, found, "bundle processed");
    Ok(())
}
