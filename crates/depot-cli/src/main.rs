//! depot: operator command line for the file storage layer.
//!
//! Reads configuration from the environment (and `.env`). Without
//! `DATABASE_URL` records live in memory and vanish with the process.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use depot_cli::{guess_mimetype, init_tracing, requester};
use depot_core::{DepotConfig, UploadOptionsInput};
use depot_services::{open_repository, ArchiveRequest, Depot};
use depot_worker::normalize_stuck_processing;
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "depot", about = "Depot file storage operations")]
struct Cli {
    /// Identity to act as
    #[arg(long = "as", global = true, default_value = "operator")]
    requester_id: String,

    /// Role of that identity: admin or user
    #[arg(long, global = true, default_value = "admin")]
    role: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file from disk and wait for its compression
    Upload {
        file: PathBuf,
        /// Override the content type guessed from the extension
        #[arg(long)]
        mimetype: Option<String>,
        #[arg(long)]
        public: bool,
        /// Comma separated tags
        #[arg(long)]
        tags: Option<String>,
        /// RFC 3339 timestamp
        #[arg(long)]
        expires_at: Option<String>,
        #[arg(long)]
        no_compression: bool,
    },
    /// Show one file record with its URLs
    Get { id: Uuid },
    /// Remove empty upload folders
    SweepFolders,
    /// Delete records whose expiry has passed, with their bytes
    PurgeExpired,
    /// Mark records stuck in processing as not_needed
    NormalizeStuck {
        /// Only records created at least this many seconds ago
        #[arg(long, default_value = "3600")]
        older_than_secs: i64,
    },
    /// Build a ZIP archive of the given files
    Archive {
        #[arg(required = true)]
        ids: Vec<Uuid>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Storage usage, for one owner or everyone
    Stats {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Files located within a radius of a point
    Nearby {
        #[arg(allow_hyphen_values = true)]
        latitude: f64,
        #[arg(allow_hyphen_values = true)]
        longitude: f64,
        #[arg(long, default_value = "10")]
        radius_km: f64,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = DepotConfig::from_env().context("Failed to load configuration")?;
    let repository = open_repository(&config).await?;
    let depot = Depot::initialize(config, repository).await?;
    let who = requester(&cli.requester_id, &cli.role);

    match cli.command {
        Commands::Upload {
            file,
            mimetype,
            public,
            tags,
            expires_at,
            no_compression,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string();
            let mimetype = mimetype.unwrap_or_else(|| guess_mimetype(&file).to_string());
            let options = UploadOptionsInput {
                is_public: Some(public.to_string()),
                tags,
                expires_at,
                enable_compression: Some((!no_compression).to_string()),
                ..UploadOptionsInput::default()
            };

            let view = depot
                .files
                .upload_bytes(&who, &name, &mimetype, &data, options)
                .await?;
            depot.dispatcher.wait_idle().await;
            print_json(&depot.files.get(view.record.id, &who).await?)?;
        }
        Commands::Get { id } => {
            print_json(&depot.files.get(id, &who).await?)?;
        }
        Commands::SweepFolders => {
            let report = depot.cleanup.sweep_empty_folders().await?;
            print_json(&serde_json::json!({
                "scanned": report.scanned,
                "removed": report.removed,
            }))?;
        }
        Commands::PurgeExpired => {
            let deleted = depot.cleanup.cleanup_expired_files(Utc::now()).await?;
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }
        Commands::NormalizeStuck { older_than_secs } => {
            let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs.max(0));
            let normalized = normalize_stuck_processing(
                depot.repository.as_ref(),
                depot.dispatcher.pipeline(),
                cutoff,
            )
            .await?;
            print_json(&serde_json::json!({ "normalized": normalized }))?;
        }
        Commands::Archive { ids, name } => {
            let result = depot
                .archives
                .create_archive(&who, ArchiveRequest { file_ids: ids, name })
                .await?;
            print_json(&result)?;
        }
        Commands::Stats { owner } => {
            let stats = depot.files.stats(owner.as_deref(), &who).await?;
            print_json(&serde_json::json!({
                "stats": stats,
                "savingsPercentage": stats.savings_percentage(),
            }))?;
        }
        Commands::Nearby {
            latitude,
            longitude,
            radius_km,
        } => {
            let results = depot
                .files
                .search_nearby(latitude, longitude, radius_km, &who)
                .await?;
            print_json(&results)?;
        }
    }

    let report = depot.shutdown().await;
    if !report.drained {
        tracing::warn!(abandoned = report.abandoned, "Exited with compression still running");
    }

    Ok(())
}
