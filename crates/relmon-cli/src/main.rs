use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relmon_storage::{
    settings_keys, HttpClientConfig, JsonFileStore, PageFetcher, RecordStore, SettingsStore,
};
use relmon_sync::{
    auto_refresh_due, crm_payload, parse_csv_column, parse_line_input, BatchConfig, BatchProgress,
    BatchReport, CrmFieldMapping, RefreshPipeline,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "relmon-cli")]
#[command(about = "Real-estate listing monitor command-line interface")]
struct Cli {
    /// Path of the JSON store file.
    #[arg(long, default_value = "relmon.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Track a new listing by MLS number or URL.
    Add { input: String },
    /// Show all tracked listings, newest first.
    List,
    /// Re-scrape one listing and reconcile it in place.
    Refresh { id: Uuid },
    /// Refresh every tracked listing.
    RefreshAll {
        /// Only run when the auto-refresh schedule says a batch is due.
        #[arg(long)]
        if_due: bool,
    },
    /// Bulk-import identifiers from a file (one per line, or a CSV column).
    Import {
        file: PathBuf,
        /// Treat the file as CSV and pick the identifier column by name.
        #[arg(long)]
        csv: bool,
    },
    /// Delete one or more listings.
    Delete { ids: Vec<Uuid> },
    /// Delete every tracked listing.
    Clear,
    /// Print the CRM create/update payload for one listing.
    ExportCrm {
        id: Uuid,
        /// JSON file mapping listing field names to CRM field names.
        mapping: PathBuf,
    },
    /// Show or change the auto-refresh configuration.
    Settings {
        #[arg(long)]
        auto_refresh: Option<bool>,
        #[arg(long)]
        interval_days: Option<u32>,
    },
}

fn print_report(report: &BatchReport) {
    println!(
        "attempted={} succeeded={} changed={}",
        report.attempted, report.succeeded, report.changed
    );
    for error in &report.errors {
        println!("  failed {}: {}", error.input_text, error.reason);
    }
}

fn progress_line(progress: BatchProgress<'_>) {
    eprintln!("[{}/{}] {}", progress.index, progress.total, progress.label);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = Arc::new(JsonFileStore::new(&cli.store));
    info!(store = %cli.store.display(), "using JSON store");

    let fetcher = Arc::new(PageFetcher::new(HttpClientConfig::default())?);
    let pipeline = RefreshPipeline::new(store.clone(), fetcher);
    let config = BatchConfig::default();

    match cli.command {
        Commands::Add { input } => {
            let listing = pipeline
                .add_listing(&input)
                .await
                .map_err(anyhow::Error::from)?;
            println!(
                "added {} ({}) status={}",
                listing.display_label(),
                listing.id,
                listing.canonical_status
            );
        }
        Commands::List => {
            for listing in store.list_all().await? {
                println!(
                    "{}  {:<12}  {:<10}  {}  (checked {})",
                    listing.id,
                    listing.canonical_status,
                    listing.fields.price.as_deref().unwrap_or("-"),
                    listing.display_label(),
                    listing.last_checked_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Commands::Refresh { id } => {
            let outcome = pipeline
                .refresh_listing(id)
                .await
                .map_err(anyhow::Error::from)?;
            if outcome.status_changed {
                println!(
                    "status changed: {} -> {}",
                    outcome.listing.previous_status.as_deref().unwrap_or("-"),
                    outcome.listing.canonical_status
                );
            } else {
                println!("no change ({})", outcome.listing.canonical_status);
            }
        }
        Commands::RefreshAll { if_due } => {
            if if_due && !auto_refresh_due(store.as_ref(), chrono::Utc::now()).await? {
                println!("auto-refresh not due yet");
                return Ok(());
            }
            let report = pipeline
                .refresh_all(store.as_ref(), &config, Some(&progress_line), None)
                .await
                .map_err(anyhow::Error::from)?;
            print_report(&report);
        }
        Commands::Import { file, csv } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let is_csv = csv || file.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            let inputs = if is_csv {
                parse_csv_column(&text)
            } else {
                parse_line_input(&text)
            };
            let report = pipeline
                .run_bulk_import(&inputs, &config, Some(&progress_line), None)
                .await;
            print_report(&report);
        }
        Commands::Delete { ids } => {
            for id in ids {
                store.delete(id).await?;
                println!("deleted {id}");
            }
        }
        Commands::Clear => {
            store.clear().await?;
            println!("cleared all listings");
        }
        Commands::ExportCrm { id, mapping } => {
            let listing = RecordStore::get(store.as_ref(), id)
                .await?
                .context("listing not found")?;
            let text = std::fs::read_to_string(&mapping)
                .with_context(|| format!("reading {}", mapping.display()))?;
            let mapping: CrmFieldMapping =
                serde_json::from_str(&text).with_context(|| "parsing CRM field mapping")?;
            let payload = crm_payload(&listing, &mapping);
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Commands::Settings {
            auto_refresh,
            interval_days,
        } => {
            let settings: &dyn SettingsStore = store.as_ref();
            if let Some(enabled) = auto_refresh {
                settings
                    .set(
                        settings_keys::AUTO_REFRESH_ENABLED,
                        if enabled { "true" } else { "false" },
                    )
                    .await?;
            }
            if let Some(days) = interval_days {
                settings
                    .set(settings_keys::REFRESH_INTERVAL_DAYS, &days.to_string())
                    .await?;
            }

            let enabled = settings
                .get(settings_keys::AUTO_REFRESH_ENABLED, "true")
                .await?;
            let days = settings
                .get(settings_keys::REFRESH_INTERVAL_DAYS, "1")
                .await?;
            let last = settings.get(settings_keys::LAST_REFRESH, "").await?;
            println!("auto_refresh_enabled={enabled}");
            println!("refresh_interval_days={days}");
            println!(
                "last_refresh={}",
                if last.is_empty() { "never" } else { last.as_str() }
            );
        }
    }

    Ok(())
}
