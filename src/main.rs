use clap::{Parser, Subcommand};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

use trialbook::db;
use trialbook::import::{self, Fatal, ImportConfig};
use trialbook::store;

#[derive(Parser)]
#[command(name = "trialbook", about = "Trial attendance and departures import/sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import every readable trials-and-leavers workbook under a source root.
    Import {
        /// Folder scanned recursively for workbooks.
        #[arg(long)]
        source: PathBuf,
        /// Local root substituted when a primary copy is unreadable.
        #[arg(long)]
        fallback: Option<PathBuf>,
        #[arg(long, default_value = "trialbook.sqlite3")]
        db: PathBuf,
        /// Clear previously imported records before importing. Destructive;
        /// refused automatically when the run would otherwise be fatal.
        #[arg(long)]
        replace: bool,
        /// Write a JSON run summary to this path.
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Run the one-shot afternoon session-time correction by itself.
    FixTimes {
        #[arg(long, default_value = "trialbook.sqlite3")]
        db: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<Fatal>()
                .map(|f| f.exit_code)
                .unwrap_or(1);
            ExitCode::from(code.clamp(1, u8::MAX as i32) as u8)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Import {
            source,
            fallback,
            db,
            replace,
            summary,
        } => {
            let conn = db::open_db(&db)?;
            let cfg = ImportConfig {
                source_root: source,
                fallback_root: fallback,
                replace,
            };
            let run_summary = import::run_import(&conn, &cfg)?;
            if let Some(path) = summary {
                std::fs::write(&path, serde_json::to_string_pretty(&run_summary)?)?;
            }
            println!(
                "imported {} attendance and {} departures from {} files",
                run_summary.attendance_inserted,
                run_summary.departures_inserted,
                run_summary.files.len()
            );
            Ok(())
        }
        Command::FixTimes { db } => {
            let conn = db::open_db(&db)?;
            let shifted = store::shift_afternoon_times(&conn)?;
            println!("shifted {} session labels", shifted);
            Ok(())
        }
    }
}
