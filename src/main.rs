use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::ratelimit::reload::spawn_poller;
use tollgate::ratelimit::{
    rate_limit_headers, Clock, ConfigSnapshot, ConfigSource, ConfigStore, CounterStore,
    FileSource, RateLimiter, ReloadController, ReloadTrigger, RequestMeta, SystemClock, WindowKind,
};

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Per-identity rate limiting for object storage")]
struct Cli {
    /// Settings file (YAML, TOML or JSON); TOLLGATE__* variables override it
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate tier files and print a summary
    Check(TierArgs),
    /// Evaluate a synthetic request and print the decision as JSON
    Explain(ExplainArgs),
    /// Load tiers and keep reloading them until interrupted
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
struct TierArgs {
    /// Tier YAML file
    #[arg(long)]
    tiers: PathBuf,

    /// Service-account JSON export
    #[arg(long)]
    accounts: Option<PathBuf>,
}

impl TierArgs {
    fn source(&self) -> FileSource {
        let source = FileSource::new(&self.tiers);
        match &self.accounts {
            Some(accounts) => source.with_accounts(accounts),
            None => source,
        }
    }
}

#[derive(Debug, Args)]
struct ExplainArgs {
    #[command(flatten)]
    tiers: TierArgs,

    /// Request method
    #[arg(long, default_value = "GET")]
    method: String,

    /// Request header as 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Raw query string
    #[arg(long)]
    query: Option<String>,

    /// Declared Content-Length
    #[arg(long)]
    content_length: Option<u64>,

    /// Evaluate the request this many times and print the last decision
    #[arg(long, default_value_t = 1)]
    repeat: u32,
}

#[derive(Debug, Args)]
struct WatchArgs {
    /// Tier YAML file, overriding reload.tiers_path
    #[arg(long)]
    tiers: Option<PathBuf>,

    /// Service-account JSON export, overriding reload.accounts_path
    #[arg(long)]
    accounts: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = TollgateConfig::load(cli.settings.as_deref())?;
    init_tracing(settings.log_level()?, settings.logging.json);

    match cli.command {
        Command::Check(args) => check(&args).await,
        Command::Explain(args) => explain(&settings, &args).await,
        Command::Watch(args) => {
            if let Some(tiers) = args.tiers {
                settings.reload.tiers_path = Some(tiers);
            }
            if let Some(accounts) = args.accounts {
                settings.reload.accounts_path = Some(accounts);
            }
            watch(&settings).await
        }
    }
}

fn init_tracing(level: Level, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn check(args: &TierArgs) -> anyhow::Result<()> {
    let source = args.source();
    let config = source.load().await?;
    let store = ConfigStore::new(&config, source.describe())?;

    print_summary(&store.current());
    Ok(())
}

fn print_summary(snapshot: &ConfigSnapshot) {
    println!("tier configuration OK: {}", snapshot.source());
    println!("tiers: {}", snapshot.tier_count());
    for name in snapshot.tier_names() {
        if let Some(limits) = snapshot.limits(name) {
            println!(
                "  {:<12} per_second={} per_minute={} bytes_in_per_minute={} bytes_out_per_minute={}",
                name,
                limits.get(WindowKind::Second),
                limits.get(WindowKind::Minute),
                limits.get(WindowKind::BytesIn),
                limits.get(WindowKind::BytesOut),
            );
        }
    }
    println!("identities: {}", snapshot.identity_count());
}

async fn explain(settings: &TollgateConfig, args: &ExplainArgs) -> anyhow::Result<()> {
    let source = args.tiers.source();
    let config = source.load().await?;
    let store = Arc::new(ConfigStore::new(&config, source.describe())?);
    let counters = Arc::new(CounterStore::new(settings.limiter.max_counter_entries));
    let limiter = RateLimiter::new(store, counters).with_extractor(settings.extractor()?);

    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid method {:?}", args.method))?;
    let headers = parse_headers(&args.headers)?;

    let mut meta = RequestMeta::new(&method, &headers);
    if let Some(query) = &args.query {
        meta = meta.with_query(query.trim_start_matches('?'));
    }
    if let Some(content_length) = args.content_length {
        meta = meta.with_content_length(content_length);
    }

    let mut decision = limiter.evaluate(&meta);
    for _ in 1..args.repeat {
        decision = limiter.evaluate(&meta);
    }

    let response_headers: BTreeMap<String, String> = rate_limit_headers(&decision)
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect();

    let output = serde_json::json!({
        "decision": decision,
        "headers": response_headers,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_headers(raw: &[String]) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let Some((name, value)) = line.split_once(':') else {
            bail!("header {:?} is not of the form 'Name: value'", line);
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name in {:?}", line))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid header value in {:?}", line))?;
        headers.append(name, value);
    }
    Ok(headers)
}

async fn watch(settings: &TollgateConfig) -> anyhow::Result<()> {
    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let source = settings
        .file_source()
        .context("no tier file configured; set reload.tiers_path or pass --tiers")?;
    let controller = Arc::new(ReloadController::bootstrap(Arc::new(source)).await?);
    print_summary(&controller.store().current());

    let counters = Arc::new(CounterStore::new(settings.limiter.max_counter_entries));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let sweeper = Arc::clone(&counters).spawn_sweeper(clock, settings.sweep_interval());

    let (triggers, receiver) = mpsc::channel(8);
    let poller = spawn_poller(triggers.clone(), settings.reload_interval());
    #[cfg(unix)]
    let hangup = spawn_hangup_listener(triggers.clone())?;
    drop(triggers);

    let runner = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run(receiver).await })
    };

    info!(
        reload_interval_secs = settings.reload.reload_interval_secs,
        max_counter_entries = settings.limiter.max_counter_entries,
        "Watching tier configuration"
    );

    shutdown_signal().await;

    poller.abort();
    sweeper.abort();
    runner.abort();
    #[cfg(unix)]
    hangup.abort();

    info!(
        version = controller.store().current().version(),
        "Tollgate stopped"
    );
    Ok(())
}

/// Forward SIGHUP to the reload controller.
#[cfg(unix)]
fn spawn_hangup_listener(
    triggers: mpsc::Sender<ReloadTrigger>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())
        .context("Failed to install SIGHUP handler")?;

    Ok(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, reloading tier configuration");
            if triggers.send(ReloadTrigger::Signal).await.is_err() {
                break;
            }
        }
    }))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
