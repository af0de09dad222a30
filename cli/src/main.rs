//! dnsgate daemon entry point.
//!
//! Reads one JSON request per line on stdin and writes one JSON response per
//! line on stdout. Timers fire in the background for the lifetime of the
//! process; their deadlines survive restarts through the state file.
//!
//! ```text
//! main() -> load config -> build Dispatcher -> seed options -> recover()
//!                                                   |
//!                                                   v
//!                        select! { stdin line | timer fired | ctrl-c }
//! ```

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use dnsgate_api::ApiClient;
use dnsgate_config::{DaemonConfig, DnsGateConfig, data_dir};
use dnsgate_core::{
    Clock, Dispatcher, HttpsProbe, IdentitySettings, SystemClock, TokioTimers, seed_options,
};
use dnsgate_store::{FileStore, MemoryStore, StateStore};
use dnsgate_types::TimerName;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries the protocol; without a log file there are no logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!("Failed to create log dir {}: {e}", parent.display()));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!("Failed to open log file {}: {e}", candidate.display()));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = data_dir() {
        candidates.push(dir.join("logs").join("dnsgate.log"));
    }
    candidates.push(PathBuf::from(".dnsgate").join("logs").join("dnsgate.log"));
    candidates
}

fn identity_settings(daemon: Option<&DaemonConfig>) -> IdentitySettings {
    match daemon {
        Some(daemon) => IdentitySettings {
            probe_zone: daemon.probe_zone(),
            settle: daemon.settle_interval(),
            attempts: daemon.probe_attempts(),
        },
        None => IdentitySettings::default(),
    }
}

fn open_store(config: &DnsGateConfig) -> Result<Arc<dyn StateStore>> {
    match config.state_path() {
        Some(path) => {
            let store = FileStore::open(&path)
                .with_context(|| format!("opening state file {}", path.display()))?;
            tracing::info!(path = %store.path().display(), "State store opened");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No home directory; state will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = match DnsGateConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("Ignoring unreadable config {}: {e}", e.path().display());
            DnsGateConfig::default()
        }
    };

    let store = open_store(&config)?;
    let api = ApiClient::new(config.credentials());
    if !api.is_configured() {
        tracing::warn!("DNS server credentials missing; remote calls will fail until configured");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (timers, fired) = TokioTimers::new(Arc::clone(&clock));
    let dispatcher = Dispatcher::new(
        Arc::new(api),
        Arc::clone(&store),
        Arc::new(timers),
        clock,
        Arc::new(HttpsProbe::new()),
        identity_settings(config.daemon.as_ref()),
    );

    if let Some(options) = &config.options {
        seed_options(store.as_ref(), &options.to_patch())
            .await
            .context("seeding options")?;
    }

    match dispatcher.recover().await {
        Ok(report) => tracing::info!(?report, "Recovery complete"),
        Err(e) => tracing::error!(error = %e, "Recovery failed; continuing with live timers only"),
    }

    serve(&dispatcher, fired).await
}

/// Requests and timer events are handled one at a time, in arrival order.
async fn serve(
    dispatcher: &Dispatcher,
    mut fired: mpsc::UnboundedReceiver<TimerName>,
) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    tracing::info!("stdin closed; shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let mut response = dispatcher.handle_json(&line).await;
                if let Some(id) = request_id(&line)
                    && let Value::Object(body) = &mut response
                {
                    body.insert("id".to_string(), id);
                }
                let mut out = response.to_string();
                out.push('\n');
                stdout.write_all(out.as_bytes()).await.context("writing response")?;
                stdout.flush().await.context("flushing response")?;
            }
            Some(name) = fired.recv() => {
                dispatcher.on_timer(&name).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted; shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Echoed back so callers can pair responses with requests.
fn request_id(line: &str) -> Option<Value> {
    serde_json::from_str::<Value>(line)
        .ok()?
        .get("id")
        .filter(|id| !id.is_null())
        .cloned()
}
