mod accounts;
mod bans;
mod osfiles;

use clap::Parser;
use hotline::config::ServerConfig;
use hotline::dispatch::Dispatcher;
use hotline::ratelimit::ConnRateLimiter;
use hotline::state::AppState;
use log::{error, info, warn};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const TRACKER_REGISTRATION_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Parser)]
#[command(author, version, about = "A Hotline 1.x chat and file-sharing server")]
struct Cli {
    /// Address to bind the transaction port to; the file-transfer port is
    /// this port + 1.
    #[arg(long, default_value = "0.0.0.0:5500")]
    address: String,

    /// Directory served as the file-transfer root.
    #[arg(long, default_value = "./files")]
    files: PathBuf,

    /// Accounts file; seeded with a default admin/guest pair if missing.
    #[arg(long, default_value = "./accounts.txt")]
    accounts: PathBuf,

    /// Server name advertised at login.
    #[arg(long, default_value = "Hotline Server")]
    name: String,

    /// Server description advertised at login.
    #[arg(long, default_value = "")]
    description: String,

    /// File whose bytes are served as the login banner.
    #[arg(long)]
    banner: Option<PathBuf>,

    /// Text file shown as the server agreement.
    #[arg(long)]
    agreement: Option<PathBuf>,

    /// Maximum concurrent downloads, server-wide.
    #[arg(long, default_value_t = 100)]
    max_downloads: usize,

    /// Maximum concurrent downloads for a single client.
    #[arg(long, default_value_t = 2)]
    max_downloads_per_client: usize,

    /// Maximum live connections from a single source IP.
    #[arg(long, default_value_t = 10)]
    max_connections_per_ip: usize,

    /// Keep Mac resource forks and Finder comments in sidecar files.
    #[arg(long, default_value_t = true)]
    preserve_resource_forks: bool,

    /// Filename regex to hide from listings; repeatable.
    #[arg(long = "ignore-file")]
    ignore_files: Vec<String>,

    /// Register with this tracker address every 5 minutes; repeatable.
    /// Registration itself isn't implemented — this only logs the intent.
    #[arg(long)]
    tracker: Vec<String>,
}

async fn read_optional_file(path: &Option<PathBuf>) -> Option<Vec<u8>> {
    let path = path.as_ref()?;
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!("failed to read {}: {}", path.display(), e);
            None
        }
    }
}

fn compile_ignore_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(r) => Some(r),
            Err(e) => {
                error!("invalid --ignore-file pattern {:?}: {}", p, e);
                None
            }
        })
        .collect()
}

async fn build_config(cli: &Cli) -> ServerConfig {
    let banner = read_optional_file(&cli.banner).await;
    let agreement_text = match &cli.agreement {
        Some(path) => tokio::fs::read_to_string(path).await.unwrap_or_else(|e| {
            error!("failed to read {}: {}", path.display(), e);
            String::new()
        }),
        None => String::new(),
    };

    ServerConfig {
        name: cli.name.clone(),
        description: cli.description.clone(),
        file_root: cli.files.clone(),
        banner,
        agreement_text,
        enable_tracker_registration: !cli.tracker.is_empty(),
        trackers: cli.tracker.clone(),
        max_downloads: cli.max_downloads,
        max_downloads_per_client: cli.max_downloads_per_client,
        max_connections_per_ip: cli.max_connections_per_ip,
        preserve_resource_forks: cli.preserve_resource_forks,
        ignore_files: compile_ignore_patterns(&cli.ignore_files),
        ..ServerConfig::default()
    }
}

/// Accepts transaction-port connections and hands each to
/// `hotline::conn::handle_connection` on its own task.
async fn accept_transaction_port(
    addr: &str,
    state: Arc<AppState>,
    dispatcher: Arc<Dispatcher>,
    rate_limiter: Arc<ConnRateLimiter>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening for transactions on {}", addr);
    loop {
        let (stream, peer) = listener.accept().await?;
        info!("accepted: {}", peer);

        let state = state.clone();
        let dispatcher = dispatcher.clone();
        let rate_limiter = rate_limiter.clone();
        tokio::spawn(async move {
            if let Err(e) = hotline::conn::handle_connection(stream, peer.ip(), state, dispatcher, rate_limiter).await {
                warn!("connection from {} ended: {}", peer, e);
            }
        });
    }
}

/// Accepts file-transfer-port connections and hands each to
/// `hotline::transfer_session::handle_transfer_session` on its own task.
async fn accept_transfer_port(addr: &str, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening for file transfers on {}", addr);
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = hotline::transfer_session::handle_transfer_session(stream, state).await {
                warn!("file transfer from {} ended: {}", peer, e);
            }
        });
    }
}

/// Logs the server's intent to register with each configured tracker on a
/// fixed cadence. Actual tracker registration is a separate UDP protocol
/// this binary doesn't speak yet.
async fn tracker_registration_loop(state: Arc<AppState>) {
    if !state.config.enable_tracker_registration {
        return;
    }
    let mut ticker = tokio::time::interval(TRACKER_REGISTRATION_INTERVAL);
    loop {
        ticker.tick().await;
        for tracker in &state.config.trackers {
            info!("would register {} with tracker {} (not implemented)", state.config.name, tracker);
        }
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let (host, port) = match hotline::utils::parse_addr(&cli.address) {
        Some(parsed) => parsed,
        None => {
            error!("invalid --address {:?}, expected host:port", cli.address);
            std::process::exit(1);
        }
    };
    let transaction_addr = cli.address.clone();
    let transfer_addr = format!("{}:{}", host, port + 1);

    let config = build_config(&cli).await;
    if let Err(e) = tokio::fs::create_dir_all(&config.file_root).await {
        error!("failed to create file root {}: {}", config.file_root.display(), e);
        std::process::exit(1);
    }

    let accounts = match accounts::FileAccountStore::load(cli.accounts.clone()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to load accounts file {}: {}", cli.accounts.display(), e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(
        config,
        accounts,
        Arc::new(hotline::news::InMemoryThreadedNewsStore::new()),
        Arc::new(hotline::news::InMemoryFlatNewsStore::new()),
        Arc::new(bans::InMemoryBanList::new()),
        Arc::new(osfiles::OSFileStore::new()),
    ));
    let dispatcher = Arc::new(hotline::handlers::default_dispatcher());
    let rate_limiter = Arc::new(ConnRateLimiter::new());

    tokio::spawn({
        let state = state.clone();
        let dispatcher = dispatcher.clone();
        let rate_limiter = rate_limiter.clone();
        async move {
            if let Err(e) = accept_transaction_port(&transaction_addr, state, dispatcher, rate_limiter).await {
                error!("transaction port accept loop ended: {}", e);
            }
        }
    });
    tokio::spawn({
        let state = state.clone();
        async move {
            if let Err(e) = accept_transfer_port(&transfer_addr, state).await {
                error!("file-transfer port accept loop ended: {}", e);
            }
        }
    });
    tokio::spawn(hotline::keepalive::run(state.clone()));
    tokio::spawn(tracker_registration_loop(state.clone()));

    wait_for_shutdown_signal().await;
    info!("shutting down");
    hotline::shutdown::broadcast_shutdown(&state, "Server is shutting down.").await;
}
