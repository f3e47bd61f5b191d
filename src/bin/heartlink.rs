//! Heartlink CLI - Headless sync of health exports into a clinical store
//!
//! Commands:
//! - sync: Run one sync pass over an export file
//! - watch: Sync an export file on a fixed cadence until interrupted
//! - preview: Print the bundle the next sync would upload
//! - digitize: Print the digitized form of each ECG recording in an export
//! - recent: List the patient's most recent ECG observations on the server
//! - status: Show the local watermark and patient identifier

use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use heartlink::config::{load_settings, Settings};
use heartlink::digitizer::EcgDigitizer;
use heartlink::source::read_export;
use heartlink::telemetry::{get_subscriber, init_subscriber};
use heartlink::{
    BundleBuilder, CancelToken, ExportFileSource, FileSettingsStore, HttpTransport,
    ObservationQuery, SettingsStore, SyncController, SyncError, SyncOutcome, TransportError,
    PRODUCER_NAME, VERSION,
};

/// Heartlink - Incremental sync of wearable vitals and ECG recordings
#[derive(Parser)]
#[command(name = "heartlink")]
#[command(author = "Synheart AI Inc")]
#[command(version = VERSION)]
#[command(about = "Sync health exports into a FHIR store", long_about = None)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass over an export file
    Sync {
        /// Health export file
        #[arg(short, long)]
        export: PathBuf,
    },

    /// Sync an export file periodically until interrupted
    Watch {
        /// Health export file
        #[arg(short, long)]
        export: PathBuf,

        /// Override the configured interval in seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: Option<u64>,
    },

    /// Print the bundle the next sync would upload
    Preview {
        /// Health export file
        #[arg(short, long)]
        export: PathBuf,

        /// Pretty-print even when stdout is not a terminal
        #[arg(long)]
        pretty: bool,
    },

    /// Digitize the ECG recordings of an export file (no configuration needed)
    Digitize {
        /// Health export file
        #[arg(short, long)]
        export: PathBuf,
    },

    /// List the patient's most recent ECG observations
    Recent {
        /// Number of observations
        #[arg(long, default_value = "5")]
        count: usize,
    },

    /// Show the local watermark and patient identifier
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), HeartlinkCliError> {
    if let Commands::Digitize { export } = &cli.command {
        return cmd_digitize(export);
    }

    let settings = load_settings(cli.config.as_deref())?;
    init_subscriber(get_subscriber(
        PRODUCER_NAME.to_string(),
        settings.log_level.clone(),
        io::stderr,
    ))?;

    match cli.command {
        Commands::Sync { export } => cmd_sync(&settings, &export).await,
        Commands::Watch {
            export,
            interval_secs,
        } => {
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| settings.sync.interval());
            cmd_watch(&settings, &export, interval).await
        }
        Commands::Preview { export, pretty } => cmd_preview(&settings, &export, pretty).await,
        Commands::Digitize { .. } => Ok(()),
        Commands::Recent { count } => cmd_recent(&settings, count).await,
        Commands::Status { json } => cmd_status(&settings, json).await,
    }
}

async fn controller(settings: &Settings, export: &Path) -> Result<SyncController, HeartlinkCliError> {
    let store = Arc::new(FileSettingsStore::new(settings.sync.state_path.clone()));
    let patient = settings.patient.resolve(&*store).await?;
    let transport = HttpTransport::new(&settings.server.base_url, settings.server.timeout())?;
    let builder =
        BundleBuilder::new(patient).with_conditional_create(settings.server.conditional_create);

    Ok(SyncController::new(
        Arc::new(ExportFileSource::new(export)),
        Arc::new(transport),
        store,
        builder,
    )
    .with_digitize_concurrency(settings.sync.digitize_concurrency))
}

/// Token cancelled on ctrl-c
fn interrupt_token() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

async fn cmd_sync(settings: &Settings, export: &Path) -> Result<(), HeartlinkCliError> {
    let controller = controller(settings, export).await?;
    let outcome = controller.sync(&interrupt_token()).await?;
    print_outcome(&outcome);
    Ok(())
}

async fn cmd_watch(
    settings: &Settings,
    export: &Path,
    interval: Duration,
) -> Result<(), HeartlinkCliError> {
    let controller = controller(settings, export).await?;
    let mut status = controller.subscribe();

    let reporter = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            if let Ok(line) = serde_json::to_string(&snapshot) {
                println!("{}", line);
            }
        }
    });

    let result = controller.run_periodic(interval, &interrupt_token()).await;
    drop(controller);
    let _ = reporter.await;
    Ok(result?)
}

async fn cmd_preview(
    settings: &Settings,
    export: &Path,
    pretty: bool,
) -> Result<(), HeartlinkCliError> {
    let controller = controller(settings, export).await?;
    match controller.preview(&interrupt_token()).await? {
        Some(bundle) if pretty || atty::is(atty::Stream::Stdout) => {
            println!("{}", serde_json::to_string_pretty(&bundle)?)
        }
        Some(bundle) => println!("{}", serde_json::to_string(&bundle)?),
        None => eprintln!("Nothing new to upload"),
    }
    Ok(())
}

fn cmd_digitize(export: &Path) -> Result<(), HeartlinkCliError> {
    let export = read_export(export)?;
    if export.waveforms.is_empty() {
        return Err(HeartlinkCliError::NoRecordings);
    }

    for waveform in &export.waveforms {
        let report = DigitizeReport {
            recording: waveform.recording.id.clone(),
            points: waveform.points.len(),
            sampled: EcgDigitizer::digitize(&waveform.points),
        };
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

async fn cmd_recent(settings: &Settings, count: usize) -> Result<(), HeartlinkCliError> {
    let store = FileSettingsStore::new(settings.sync.state_path.clone());
    let patient = settings.patient.resolve(&store).await?;
    let transport = HttpTransport::new(&settings.server.base_url, settings.server.timeout())?;

    let observations = ObservationQuery::new(transport, patient.id)
        .recent_waveforms(count)
        .await?;

    for observation in observations {
        match observation.effective {
            Some(effective) => println!("{}  {}", observation.reference(), effective.to_rfc3339()),
            None => println!("{}", observation.reference()),
        }
    }
    Ok(())
}

async fn cmd_status(settings: &Settings, json: bool) -> Result<(), HeartlinkCliError> {
    let store = FileSettingsStore::new(settings.sync.state_path.clone());
    let local = store.load().await?;

    if json {
        println!("{}", local.to_json()?);
    } else {
        println!("Heartlink Status");
        println!("================");
        println!("Version:     {}", VERSION);
        println!("Server:      {}", settings.server.base_url);
        println!("State file:  {}", store.path().display());
        println!(
            "Patient:     {}",
            local.patient_id.as_deref().unwrap_or("(not yet assigned)")
        );
        match local.last_synced_at {
            Some(at) => println!("Last sync:   {}", at.to_rfc3339()),
            None => println!("Last sync:   never"),
        }
    }
    Ok(())
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Uploaded {
            observations,
            watermark,
        } => println!(
            "Uploaded {} observations, watermark now {}",
            observations,
            watermark.to_rfc3339()
        ),
        SyncOutcome::NothingToSend => println!("Nothing new to upload"),
        SyncOutcome::Coalesced => println!("A sync pass is already running"),
    }
}

// Error types

#[derive(Debug)]
enum HeartlinkCliError {
    Sync(SyncError),
    Json(serde_json::Error),
    NoRecordings,
}

impl From<SyncError> for HeartlinkCliError {
    fn from(e: SyncError) -> Self {
        HeartlinkCliError::Sync(e)
    }
}

impl From<TransportError> for HeartlinkCliError {
    fn from(e: TransportError) -> Self {
        HeartlinkCliError::Sync(SyncError::Transport(e))
    }
}

impl From<serde_json::Error> for HeartlinkCliError {
    fn from(e: serde_json::Error) -> Self {
        HeartlinkCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
    retryable: bool,
}

impl From<HeartlinkCliError> for CliError {
    fn from(e: HeartlinkCliError) -> Self {
        match e {
            HeartlinkCliError::Sync(e) => {
                let retryable = e.is_retryable();
                let (code, hint) = match &e {
                    SyncError::Source(_) => ("SOURCE_ERROR", "Check the export file path and contents"),
                    SyncError::Transport(_) => ("TRANSPORT_ERROR", "The watermark was not advanced; retry later"),
                    SyncError::Cancelled => ("CANCELLED", "The watermark was not advanced"),
                    SyncError::Config(_) => ("CONFIG_ERROR", "Check the configuration file and HEARTLINK__* variables"),
                    SyncError::State(_) => ("STATE_ERROR", "Check the state file path and permissions"),
                    SyncError::Mapping(_) | SyncError::Serialization { .. } => {
                        ("MAPPING_ERROR", "Report this with the offending export")
                    }
                    SyncError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                    retryable,
                }
            }
            HeartlinkCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
                retryable: false,
            },
            HeartlinkCliError::NoRecordings => CliError {
                code: "NO_RECORDINGS".to_string(),
                message: "No ECG recordings found in export".to_string(),
                hint: Some("Ensure the export has a non-empty waveforms array".to_string()),
                retryable: false,
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DigitizeReport {
    recording: String,
    points: usize,
    sampled: Option<heartlink::types::SampledData>,
}
