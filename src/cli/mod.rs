//! Command-line front end for the outbox.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use outbox::{
    CacheBuckets, CacheManager, CacheRequest, Config, Connectivity, ConnectivityProbe, FileSource,
    FormSubmission, HttpNetwork, Interception, Network, Outbox, OutboxStore, SqliteStore,
    SyncOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "outbox")]
#[command(about = "Durable offline write queue with ordered replay", long_about = None)]
pub struct Args {
    /// Directory holding outbox.toml and .env
    #[arg(long, global = true, default_value = ".")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show queue depth, attachment size and the oldest record
    Status,

    /// List queued records in replay order
    List,

    /// Capture a form submission into the outbox as if offline
    Capture {
        /// Form action URL, e.g. /fees/pay
        #[arg(long)]
        action: String,

        #[arg(long, default_value = "POST")]
        method: String,

        /// Form field as key=value (repeatable)
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// Attachment as key=path[:mime] (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
    },

    /// Replay the outbox once
    Sync,

    /// Fetch a URL through the offline cache
    Fetch {
        url: String,

        /// Treat the network as unavailable
        #[arg(long)]
        offline: bool,

        /// Print the response body
        #[arg(long, short)]
        body: bool,
    },

    /// Run the dispatcher with periodic sync and a connectivity probe
    Run,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

/// Parse `key=path[:mime]`. A suffix after the last `:` is a MIME type only if it contains `/`.
fn parse_file(raw: &str) -> anyhow::Result<(String, PathBuf, String)> {
    let (key, rest) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected key=path[:mime], got '{}'", raw))?;

    let (path, mime) = match rest.rsplit_once(':') {
        Some((path, mime)) if mime.contains('/') => (path, mime.to_string()),
        _ => (rest, guess_mime(Path::new(rest)).to_string()),
    };
    Ok((key.to_string(), PathBuf::from(path), mime))
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

pub async fn execute(args: Args) -> anyhow::Result<()> {
    let config = Config::load_or_default(&args.config_dir)?;

    match args.command {
        Command::Status => cmd_status(&config).await,
        Command::List => cmd_list(&config).await,
        Command::Capture {
            action,
            method,
            fields,
            files,
        } => cmd_capture(&config, &action, &method, fields, &files).await,
        Command::Sync => cmd_sync(&config).await,
        Command::Fetch { url, offline, body } => cmd_fetch(&config, &url, offline, body).await,
        Command::Run => cmd_run(&config).await,
    }
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config.database_path();
    tracing::debug!("Using outbox database {}", path.display());
    Ok(Arc::new(SqliteStore::open_at(&path)?))
}

fn http_network(config: &Config) -> anyhow::Result<Arc<dyn Network>> {
    Ok(Arc::new(HttpNetwork::new(
        config.base_url.as_deref(),
        config.credentials.as_deref(),
    )?))
}

async fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let stats = open_store(config)?.stats().await?;

    println!("{} {}", "Pending:".bold(), stats.pending);
    println!("{} {} bytes", "Attachments:".bold(), stats.attachment_bytes);
    match stats.oldest {
        Some(oldest) => println!("{} {}", "Oldest:".bold(), oldest.to_rfc3339()),
        None => println!("{} -", "Oldest:".bold()),
    }
    Ok(())
}

async fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let pending = open_store(config)?.get_all().await?;
    if pending.is_empty() {
        println!("{} Outbox is empty", "•".dimmed());
        return Ok(());
    }

    for (position, op) in pending.iter().enumerate() {
        let files = if op.files.is_empty() {
            String::new()
        } else {
            format!(" +{} file(s)", op.files.len())
        };
        println!(
            "{:>3}. {} {} {} [{}]{} {}",
            position + 1,
            op.id.to_string().dimmed(),
            op.method.cyan(),
            op.target_url,
            op.encoding,
            files,
            op.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    Ok(())
}

async fn cmd_capture(
    config: &Config,
    action: &str,
    method: &str,
    fields: Vec<(String, String)>,
    files: &[String],
) -> anyhow::Result<()> {
    let form_config = config.form_config(action);
    if !form_config.sync_eligible {
        println!(
            "{} Form '{}' is not declared in {}; nothing queued",
            "!".yellow(),
            action,
            outbox::config::CONFIG_FILE_NAME
        );
        return Ok(());
    }

    let mut form = FormSubmission::new(action, form_config).method(method);
    form.fields = fields;
    for raw in files {
        let (key, path, mime) = parse_file(raw)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        form = form.file(&key, &file_name, &mime, FileSource::Path(path));
    }

    let store: Arc<dyn OutboxStore> = open_store(config)?;
    let outbox = Outbox::new(Some(store), http_network(config)?, config.outbox_options(false));

    match outbox.submit(&form).await {
        Ok(Interception::Queued { id, pending }) => {
            println!("{} Queued {} ({} pending)", "✓".green(), id, pending);
            Ok(())
        }
        Ok(other) => {
            println!("{} Not queued: {:?}", "!".yellow(), other);
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e.user_message());
            Err(e.into())
        }
    }
}

async fn cmd_sync(config: &Config) -> anyhow::Result<()> {
    let store: Arc<dyn OutboxStore> = open_store(config)?;
    let outbox = Outbox::new(Some(store), http_network(config)?, config.outbox_options(true));
    let engine = outbox
        .engine()
        .ok_or_else(|| anyhow::anyhow!("no sync engine without a store"))?;

    match engine.sync_now().await? {
        SyncOutcome::Skipped(reason) => {
            println!("{} Nothing to do ({:?})", "•".dimmed(), reason);
        }
        SyncOutcome::Finished(report) => match report.halted {
            None => println!(
                "{} Replayed {}, {} remaining",
                "✓".green(),
                report.replayed,
                report.remaining
            ),
            Some(halt) => {
                println!(
                    "{} Replayed {}, halted at {}: {}",
                    "✗".red(),
                    report.replayed,
                    halt.id,
                    halt.reason
                );
                println!("  {} remaining", report.remaining.to_string().yellow());
            }
        },
    }
    Ok(())
}

async fn cmd_fetch(config: &Config, url: &str, offline: bool, body: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let cache = CacheManager::new(
        CacheBuckets::new(store.database().clone()),
        http_network(config)?,
        config.cache.clone(),
        Connectivity::new(!offline),
    );
    cache.activate().await?;

    let request = CacheRequest::get(url);
    let response = cache.fetch(&request).await?;
    let status = if response.is_success() {
        response.status.to_string().green()
    } else {
        response.status.to_string().red()
    };
    println!(
        "{} {} ({} bytes, {:?})",
        status,
        url,
        response.body.len(),
        outbox::cache::classify(&request, cache.settings())
    );
    if body {
        println!("{}", response.text());
    }
    Ok(())
}

async fn cmd_run(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let network = http_network(config)?;

    let cache = CacheManager::new(
        CacheBuckets::new(store.database().clone()),
        network.clone(),
        config.cache.clone(),
        Connectivity::new(true),
    );
    cache.activate().await?;
    if !config.cache.precache.is_empty() {
        cache.install(&config.cache.precache).await;
    }

    let outbox = Arc::new(Outbox::new(
        Some(store as Arc<dyn OutboxStore>),
        network.clone(),
        config.outbox_options(true),
    ));

    let mut status_rx = outbox.status().subscribe();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            tracing::info!("Status: {}", status);
        }
    });

    let (tx, rx) = mpsc::channel(64);
    let probe = config.probe_url().map(|url| {
        ConnectivityProbe::new(network.clone(), url, config.probe_interval())
            .spawn(true, tx.clone())
    });
    if probe.is_none() {
        tracing::warn!("No probe URL or base URL configured, connectivity is assumed online");
    }

    let dispatcher = {
        let outbox = outbox.clone();
        tokio::spawn(async move { outbox.run(rx).await })
    };

    shutdown_signal().await;
    if let Some(probe) = probe {
        probe.abort();
    }
    drop(tx);
    dispatcher.await?;
    tracing::info!("Shutdown complete, {} pending", outbox.pending_count().await);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
