//! `lease-notifier` entry-point: processes lease events or checks templates.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cap_std::{ambient_authority, fs::Dir};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, eyre};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tokio::runtime::Builder;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use lease_notifier::config::NotifierSettings;
use lease_notifier::domain::credentials::CachedProviderCredential;
use lease_notifier::domain::ports::{
    FixtureAccountStore, FixtureLeaseStore, FixturePreferenceRepository, NotificationMetrics,
    SecretSource,
};
use lease_notifier::domain::{
    InboundEvent, NotificationPipeline, NotificationPipelinePorts, PipelineReport, PipelineState,
};
use lease_notifier::outbound::alerts::TracingOperationalAlerts;
use lease_notifier::outbound::memory::{
    InMemoryDeadLetterQueue, InMemoryIdempotencyStore, InMemoryLeaseDirectory,
    InMemoryPreferenceRepository, InMemoryRetryQueue,
};
use lease_notifier::outbound::notify::NotifyHttpProvider;
use lease_notifier::outbound::secrets::{EnvSecretSource, FileSecretSource};

/// `lease-notifier` command arguments.
#[derive(Debug, Parser)]
#[command(
    name = "lease-notifier",
    about = "Deliver lease lifecycle notifications with exactly-once semantics",
    version
)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process a batch of events and print one JSON report per event.
    Process {
        /// JSON array or newline-delimited events; `-` reads stdin.
        #[arg(long = "events", value_name = "path")]
        events: PathBuf,
        /// Lease directory snapshot (`leases`, `accounts`, `leaseTemplates`).
        #[arg(long = "directory", value_name = "path")]
        directory: PathBuf,
    },
    /// Compare every configured template with the provider's declared fields.
    CheckTemplates,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(error) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .with_writer(io::stderr)
        .try_init()
    {
        warn!(error = %error, "tracing init failed");
    }

    let args = CliArgs::parse();
    let settings = NotifierSettings::load_from_iter([OsString::from("lease-notifier")])
        .map_err(|error| eyre!("failed to load notifier settings: {error}"))?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create Tokio runtime")?;
    runtime.block_on(async {
        match args.command {
            Command::Process { events, directory } => process(&settings, &events, &directory).await,
            Command::CheckTemplates => check_templates(&settings).await,
        }
    })
}

async fn process(settings: &NotifierSettings, events: &Path, directory: &Path) -> Result<()> {
    let snapshot = read_text(directory)?;
    let directory = Arc::new(
        InMemoryLeaseDirectory::from_json_str(&snapshot)
            .wrap_err_with(|| format!("failed to parse directory snapshot {}", directory.display()))?,
    );
    let ports = NotificationPipelinePorts::new(
        directory.clone(),
        directory.clone(),
        directory,
        Arc::new(InMemoryPreferenceRepository::new()),
        Arc::new(InMemoryIdempotencyStore::new()),
        provider(settings)?,
        Arc::new(InMemoryDeadLetterQueue::new()),
        Arc::new(InMemoryRetryQueue::new()),
        metrics()?,
        Arc::new(TracingOperationalAlerts),
    );
    let config = settings
        .pipeline_config()
        .wrap_err("invalid notifier settings")?;
    let pipeline = NotificationPipeline::new(ports, Arc::new(DefaultClock), config);

    let batch = parse_batch(&read_text(events)?);
    let mut sent = 0_usize;
    for (index, parsed) in batch.into_iter().enumerate() {
        let event = match parsed {
            Ok(event) => event,
            Err(error) => {
                warn!(entry = index + 1, error = %error, "skipping undecodable event");
                continue;
            }
        };
        sent += emit(&pipeline.process(&event).await)?;
    }

    let retried = pipeline
        .drain_due_retries(usize::MAX)
        .await
        .wrap_err("failed to drain due retries")?;
    let abandoned = pipeline
        .dead_letter_pending()
        .await
        .wrap_err("failed to dead-letter outstanding retries")?;
    for report in retried.iter().chain(&abandoned) {
        sent += emit(report)?;
    }
    if !abandoned.is_empty() {
        warn!(
            abandoned = abandoned.len(),
            "retries still scheduled at exit were dead-lettered"
        );
    }
    info!(sent, "batch processed");
    Ok(())
}

/// Print one report as a JSON line; returns 1 when it records a send.
fn emit(report: &PipelineReport) -> Result<usize> {
    println!(
        "{}",
        serde_json::to_string(report).wrap_err("failed to encode report")?
    );
    Ok(usize::from(report.state == PipelineState::Sent))
}

async fn check_templates(settings: &NotifierSettings) -> Result<()> {
    let ports = NotificationPipelinePorts::new(
        Arc::new(FixtureLeaseStore),
        Arc::new(FixtureAccountStore),
        Arc::new(InMemoryLeaseDirectory::default()),
        Arc::new(FixturePreferenceRepository),
        Arc::new(InMemoryIdempotencyStore::new()),
        provider(settings)?,
        Arc::new(InMemoryDeadLetterQueue::new()),
        Arc::new(InMemoryRetryQueue::new()),
        metrics()?,
        Arc::new(TracingOperationalAlerts),
    );
    let config = settings
        .pipeline_config()
        .wrap_err("invalid notifier settings")?;
    let pipeline = NotificationPipeline::new(ports, Arc::new(DefaultClock), config);
    pipeline
        .validate_templates()
        .await
        .wrap_err("provider templates do not match the registry")?;
    info!("every provider template declares its required fields");
    Ok(())
}

fn provider(settings: &NotifierSettings) -> Result<Arc<NotifyHttpProvider>> {
    let (source, name) = secret_source(settings)?;
    let credential = Arc::new(CachedProviderCredential::new(source, name));
    let base = settings
        .provider_url()
        .wrap_err("invalid provider url")?;
    let provider = NotifyHttpProvider::new(base, credential, settings.provider_timeout())
        .wrap_err("failed to build provider client")?;
    Ok(Arc::new(provider))
}

fn secret_source(settings: &NotifierSettings) -> Result<(Arc<dyn SecretSource>, String)> {
    let Some(path) = settings.api_key_file.as_deref() else {
        return Ok((Arc::new(EnvSecretSource), settings.api_key_env().to_owned()));
    };
    let (parent, file_name) = split_path(path)?;
    let source = FileSecretSource::open(parent)
        .wrap_err_with(|| format!("failed to open secrets directory {}", parent.display()))?;
    Ok((Arc::new(source), file_name))
}

#[cfg(feature = "metrics")]
fn metrics() -> Result<Arc<dyn NotificationMetrics>> {
    use lease_notifier::outbound::metrics::PrometheusNotificationMetrics;

    let metrics = PrometheusNotificationMetrics::new(prometheus::default_registry())
        .wrap_err("failed to register notification metrics")?;
    Ok(Arc::new(metrics))
}

#[cfg(not(feature = "metrics"))]
fn metrics() -> Result<Arc<dyn NotificationMetrics>> {
    Ok(Arc::new(
        lease_notifier::domain::ports::NoOpNotificationMetrics,
    ))
}

fn split_path(path: &Path) -> Result<(&Path, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| eyre!("{} does not name a file", path.display()))?;
    Ok((parent, file_name.to_owned()))
}

fn read_text(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .wrap_err("failed to read stdin")?;
        return Ok(text);
    }
    let (parent, file_name) = split_path(path)?;
    let directory = Dir::open_ambient_dir(parent, ambient_authority())
        .wrap_err_with(|| format!("failed to open directory {}", parent.display()))?;
    directory
        .read_to_string(&file_name)
        .wrap_err_with(|| format!("failed to read {}", path.display()))
}

/// Decode a JSON array of events, or one event per non-blank line.
fn parse_batch(text: &str) -> Vec<Result<InboundEvent, serde_json::Error>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return match serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
            Ok(values) => values
                .into_iter()
                .map(serde_json::from_value::<InboundEvent>)
                .collect(),
            Err(error) => vec![Err(error)],
        };
    }
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str::<InboundEvent>)
        .collect()
}
