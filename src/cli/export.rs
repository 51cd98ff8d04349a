//! Export CLI command
//!
//! Writes a snapshot of the configured domains in a human-readable format.
//! Only the canonical JSON form can be restored; YAML and CSV are for
//! reading and interchange.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;

use crate::backup::BackupEngine;
use crate::error::BackupResult;
use crate::snapshot::SnapshotFormat;
use crate::storage::file_io::write_bytes_atomic;

/// Arguments for `keepsafe export`
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: SnapshotFormat,

    /// Output file (stdout if omitted)
    pub output: Option<PathBuf>,
}

/// Handle the export command
pub fn handle_export_command(engine: &BackupEngine, args: ExportArgs) -> BackupResult<()> {
    let bytes = engine.export_snapshot(args.format)?;

    match args.output {
        Some(path) => {
            write_bytes_atomic(&path, &bytes)?;
            println!("Exported {} snapshot to {}", args.format, path.display());
            if !args.format.is_restorable() {
                println!("Note: {} exports cannot be restored.", args.format);
            }
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }

    Ok(())
}
