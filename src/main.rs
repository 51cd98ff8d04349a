use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use keepsafe::cli::{
    handle_backup_command, handle_config_command, handle_export_command,
    handle_schedule_command, open_engine, BackupCommands, CloudTarget, ConfigCommands,
    EngineOptions, ExportArgs, ScheduleCommands,
};
use keepsafe::config::{BackupConfiguration, EnginePaths};
use keepsafe::destination::S3Settings;
use keepsafe::logging::{self, Profile};

#[derive(Parser)]
#[command(
    name = "keepsafe",
    version,
    about = "Backup and recovery for application data",
    long_about = "Keepsafe takes point-in-time snapshots of application data, \
                  optionally encrypts them, stores them locally and in the cloud, \
                  keeps them for a retention window and restores them atomically."
)]
struct Cli {
    /// S3 bucket for cloud copies
    #[arg(long, global = true, env = "KEEPSAFE_S3_BUCKET")]
    s3_bucket: Option<String>,

    /// Region of the S3 bucket
    #[arg(long, global = true, env = "KEEPSAFE_S3_REGION", default_value = "us-east-1")]
    s3_region: String,

    /// Endpoint of an S3-compatible service (MinIO, Wasabi, ...)
    #[arg(long, global = true, env = "KEEPSAFE_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// Key prefix inside the S3 bucket
    #[arg(long, global = true, env = "KEEPSAFE_S3_PREFIX", default_value = "keepsafe")]
    s3_prefix: String,

    /// Mounted or synced folder used as the cloud bucket
    #[arg(long, global = true, env = "KEEPSAFE_CLOUD_DIR")]
    cloud_dir: Option<PathBuf>,

    /// Logging profile
    #[arg(long, global = true, value_enum, default_value = "console")]
    log: Profile,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and default configuration
    Init,

    /// Backup management commands
    #[command(subcommand)]
    Backup(BackupCommands),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Export a snapshot of current data
    Export(ExportArgs),

    /// Scheduling commands
    #[command(subcommand)]
    Schedule(ScheduleCommands),
}

impl Cli {
    fn cloud_target(&self) -> Result<Option<CloudTarget>> {
        match (&self.s3_bucket, &self.cloud_dir) {
            (Some(_), Some(_)) => bail!("Use either an S3 bucket or a cloud directory, not both"),
            (Some(bucket), None) => {
                let mut settings = S3Settings::new(bucket.clone(), self.s3_region.clone())
                    .with_prefix(self.s3_prefix.clone());
                if let Some(endpoint) = &self.s3_endpoint {
                    settings = settings.with_endpoint(endpoint.clone());
                }
                Ok(Some(CloudTarget::S3(settings)))
            }
            (None, Some(dir)) => Ok(Some(CloudTarget::Directory(dir.clone()))),
            (None, None) => Ok(None),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log);

    let paths = EnginePaths::new()?;

    let mut options = EngineOptions {
        cloud: cli.cloud_target()?,
        require_key: false,
    };

    match cli.command {
        Commands::Init => {
            println!("Initializing Keepsafe at: {}", paths.base_dir().display());
            paths.ensure_directories()?;
            let config = BackupConfiguration::load_or_create(&paths)?;
            config.save(&paths)?;
            println!("Initialization complete!");
            println!();
            println!("Configuration: {}", paths.config_file().display());
            println!("Backups:       {}", paths.backup_dir().display());
            println!();
            println!("Run 'keepsafe backup create' to take your first backup.");
        }
        Commands::Backup(cmd) => {
            let engine = open_engine(&paths, &options)?;
            handle_backup_command(&engine, cmd)?;
        }
        Commands::Config(cmd) => {
            if let ConfigCommands::Set(args) = &cmd {
                options.require_key = args.encryption == Some(true);
            }
            let engine = open_engine(&paths, &options)?;
            handle_config_command(&engine, &paths, cmd)?;
        }
        Commands::Export(args) => {
            let engine = open_engine(&paths, &options)?;
            handle_export_command(&engine, args)?;
        }
        Commands::Schedule(cmd) => {
            let engine = Arc::new(open_engine(&paths, &options)?);
            handle_schedule_command(engine, cmd)?;
        }
    }

    Ok(())
}
