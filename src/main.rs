//! Picture Sorter - headless front end.
//!
//! Opens one folder as a sorting session, optionally applies a bulk change,
//! exports the kept pictures or renames them by capture date, and prints a
//! summary of the session.
//!
//! # Execution Flow
//!
//! 1. Initialize logging → logs/picture-sorter.<date>
//! 2. Load settings from the settings directory (plus `PICTURE_SORTER_*`)
//! 3. Open the folder (lock, scan, merge saved progress, resolve dates)
//! 4. Warm the cache for the first picture
//! 5. Run the requested actions
//! 6. Close the session (releases the lock)

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use picture_sorter::services::{ExportNaming, LockDecision, StandardDecoder, TimestampResolver};
use picture_sorter::{APP_NAME, SessionController, SettingsManager, VERSION};

#[derive(Parser)]
#[command(name = "picture-sorter")]
#[command(version)]
#[command(about = "Sort a folder of pictures and export the keepers")]
struct Cli {
    /// Folder to open
    folder: Utf8PathBuf,

    /// Directory holding settings.yaml
    #[arg(long, value_name = "DIR", default_value = "settings")]
    settings_dir: Utf8PathBuf,

    /// Directory for log files
    #[arg(long, value_name = "DIR", default_value = "logs")]
    log_dir: String,

    /// Take over the folder even if another session locked it
    #[arg(long)]
    force: bool,

    /// Mark every picture as kept (the previous progress is backed up)
    #[arg(long, conflicts_with = "deselect_all")]
    select_all: bool,

    /// Mark every picture as discarded (the previous progress is backed up)
    #[arg(long)]
    deselect_all: bool,

    /// Rename pictures in place to IMG_<date>_<time>
    #[arg(long)]
    rename_by_date: bool,

    /// Copy the kept pictures into a new sibling folder
    #[arg(long)]
    export: bool,

    /// File names used by --export
    #[arg(long, value_enum, default_value_t = Naming::Original)]
    naming: Naming,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Naming {
    Original,
    CaptureDate,
}

impl From<Naming> for ExportNaming {
    fn from(naming: Naming) -> Self {
        match naming {
            Naming::Original => ExportNaming::Original,
            Naming::CaptureDate => ExportNaming::CaptureDate,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = picture_sorter::logging::setup_logging_with_console(
        &cli.log_dir,
        "picture-sorter",
        cli.debug,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    // Deferred cache preparation only needs a timer
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(run(cli));
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    tracing::info!("Shutdown complete");
    result
}

async fn run(cli: Cli) -> Result<()> {
    let settings_manager = SettingsManager::new(&cli.settings_dir)?;
    let settings = settings_manager.load_settings()?;

    let mut controller = SessionController::new(
        settings,
        Box::new(StandardDecoder::new()),
        TimestampResolver::new(),
    );

    let force = cli.force;
    let opened = controller
        .open_folder(&cli.folder, |conflict| {
            if force {
                LockDecision::ForceOverride
            } else {
                eprintln!(
                    "{} is locked by another session ({}); use --force to take over",
                    conflict.folder,
                    conflict.owner.as_deref().unwrap_or("unknown owner")
                );
                LockDecision::Abort
            }
        })
        .with_context(|| format!("Failed to open {}", cli.folder))?;

    println!(
        "Opened {} with {} pictures ({} dates resolved)",
        opened.folder, opened.records, opened.resolved
    );

    if opened.records > 0 {
        controller.select(0)?;
        controller.run_deferred().await?;
    }

    if cli.select_all {
        let changed = controller.select_all()?;
        println!("Selected all pictures ({} changed)", changed);
    } else if cli.deselect_all {
        let changed = controller.deselect_all()?;
        println!("Deselected all pictures ({} changed)", changed);
    }

    if cli.rename_by_date {
        let report = controller
            .rename_by_capture_date()
            .context("Rename by capture date failed")?;
        println!("Renamed {} pictures", report.finalized().count());
    }

    println!(
        "{} of {} pictures kept",
        controller.selected_count(),
        controller.records().len()
    );

    if cli.export {
        let summary = controller
            .export(cli.naming.into())
            .context("Export failed")?;
        println!(
            "Exported {} pictures to {}",
            summary.report.copied.len(),
            summary.report.destination
        );
        if summary.reopened {
            println!("Now sorting {}", summary.report.destination);
        }
    }

    controller.close();
    Ok(())
}
