//! Command line entry point.
//!
//! ```bash
//! structdb notes.txt              # catalog one file
//! structdb data/notes.txt.sbp     # restore it
//! structdb                        # catalog the data directory (auto mode)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use structdb::interface::{Manager, Outcome};
use structdb::settings::{DEFAULT_SETTINGS_FILE, Settings};

/// Dictionary based compression through a growing store of structs
#[derive(Parser, Debug)]
#[command(name = "structdb")]
struct Args {
    /// File or directory to process, the data directory when omitted
    path: Option<PathBuf>,

    /// Settings file (INI)
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    /// Write blueprints listing every descendant of the root
    #[arg(long)]
    full: bool,
}

fn run(args: Args) -> structdb::Result<()> {
    let mut settings = Settings::load(&args.settings)?;
    if args.full {
        settings.full_blueprints = true;
    }
    let manager = Manager::open(settings)?;
    let outcomes = manager.run(args.path.as_deref())?;
    let mut skipped = 0;
    for outcome in &outcomes {
        match outcome {
            Outcome::Cataloged { source, blueprint } => {
                println!("{} -> {}", source.display(), blueprint.display())
            }
            Outcome::Restored { source, output } => println!("{} -> {}", source.display(), output.display()),
            Outcome::Skipped { source, reason } => {
                skipped += 1;
                println!("{} skipped: {}", source.display(), reason)
            }
        }
    }
    info!(
        files = outcomes.len(),
        skipped,
        structs = manager.database().len()?,
        "run complete"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "structdb failed");
            ExitCode::FAILURE
        }
    }
}
