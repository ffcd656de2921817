use std::{
    env,
    io::ErrorKind,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use linkhop::{
    app, codec,
    config::{Config, ServerConfig},
    engine::{Action, ResolveRequest},
    state::{reload_app_state_from_path, AppState, SharedAppState},
    util::non_empty,
    RoutingContext,
};
use tokio::net::TcpListener;

const DEFAULT_CONFIG_PATH: &str = "config/linkhop.yaml";
const CONFIG_FILE_NAME: &str = "linkhop.yaml";

#[derive(Parser, Debug)]
#[command(
    name = "linkhop",
    about = "Redirect resolution and link classification service",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default).
    Serve {
        /// Configuration file; defaults to `$LINKHOP_CONFIG` or `config/linkhop.yaml`.
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Resolve a token, URL or content id once and print the result as JSON.
    Resolve {
        /// Routing token, distribution URL or numeric content id.
        id: String,
        #[arg(short, long)]
        quality: Option<String>,
        /// `stream` or `download`.
        #[arg(short, long)]
        action: Option<Action>,
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Encode a routing context into a token.
    Encode(EncodeArgs),
    /// Decode a routing token and print its context as JSON.
    Decode { token: String },
    /// Validate configuration files without starting the server.
    Validate {
        /// Directory containing `linkhop.yaml`.
        #[arg(
            short = 'c',
            long = "config",
            value_name = "DIR",
            default_value = "config"
        )]
        config_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct EncodeArgs {
    #[arg(long)]
    destination: Option<String>,
    #[arg(long, default_value = "")]
    title: String,
    #[arg(long)]
    poster: Option<String>,
    #[arg(long = "content-id")]
    content_id: Option<String>,
    #[arg(long)]
    season: Option<String>,
    #[arg(long)]
    server: Option<String>,
    #[arg(long)]
    quality: Option<String>,
}

impl From<EncodeArgs> for RoutingContext {
    fn from(args: EncodeArgs) -> Self {
        Self {
            destination_ref: args.destination.unwrap_or_default(),
            title: args.title,
            poster_ref: non_empty(args.poster),
            content_id: non_empty(args.content_id),
            season: non_empty(args.season),
            server_hint: non_empty(args.server),
            quality_hint: non_empty(args.quality),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    load_env_file()?;
    linkhop::init()?;

    match cli.command {
        Some(Command::Serve { config }) => run_server(config_path(config)).await,
        None => run_server(config_path(None)).await,
        Some(Command::Resolve {
            id,
            quality,
            action,
            config,
        }) => resolve_once(&config_path(config), id, quality, action).await,
        Some(Command::Encode(args)) => encode_token(args.into()),
        Some(Command::Decode { token }) => decode_token(&token),
        Some(Command::Validate { config_dir }) => validate_config_dir(&config_dir),
    }
}

fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| env::var_os("LINKHOP_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load_from_path(path)
        .with_context(|| format!("failed to load configuration from `{}`", path.display()))
}

async fn run_server(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let addr = resolve_listener_addr(&config.server)
        .context("failed to resolve listener address from configuration")?;

    let app_state = AppState::from_config(&config)
        .context("failed to build application state from configuration")?;
    let shared_state = SharedAppState::new(app_state);
    let router = app::build_router(shared_state.clone());

    tracing::info!(path = %config_path.display(), %addr, "starting linkhop server");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| "failed to bind listener socket")?;
    let local_addr = listener
        .local_addr()
        .with_context(|| "failed to determine listener address")?;
    tracing::info!(%local_addr, "linkhop listening");

    #[cfg(unix)]
    tokio::spawn(watch_for_config_reloads(
        config_path.clone(),
        shared_state.clone(),
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("linkhop shutdown complete");

    Ok(())
}

async fn resolve_once(
    config_path: &Path,
    id: String,
    quality: Option<String>,
    action: Option<Action>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let state = AppState::from_config(&config)
        .context("failed to build application state from configuration")?;

    let result = state
        .engine()
        .resolve(ResolveRequest {
            token: Some(id),
            quality,
            action,
            params: Vec::new(),
        })
        .await;

    let json = serde_json::to_string_pretty(&result).context("failed to render result")?;
    println!("{json}");

    Ok(())
}

fn encode_token(context: RoutingContext) -> Result<()> {
    if context.destination_ref.trim().is_empty() && context.content_id.is_none() {
        anyhow::bail!("either --destination or --content-id is required");
    }

    let token = codec::encode(&context).context("failed to encode routing context")?;
    println!("{token}");

    Ok(())
}

fn decode_token(token: &str) -> Result<()> {
    let context = codec::decode(token).context("failed to decode routing token")?;
    let json = serde_json::to_string_pretty(&context).context("failed to render context")?;
    println!("{json}");

    Ok(())
}

fn validate_config_dir(dir: &Path) -> Result<()> {
    let config_path = dir.join(CONFIG_FILE_NAME);
    let config = load_config(&config_path)?;

    AppState::from_config(&config).with_context(|| {
        format!(
            "configuration `{}` failed validation",
            config_path.display()
        )
    })?;

    println!("configuration at `{}` is valid", config_path.display());

    Ok(())
}

#[cfg(unix)]
async fn watch_for_config_reloads(config_path: PathBuf, state: SharedAppState) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut signals = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(%error, "failed to initialise SIGHUP watcher");
            return;
        }
    };

    while signals.recv().await.is_some() {
        tracing::info!(path = %config_path.display(), "received SIGHUP; reloading configuration");
        match reload_app_state_from_path(&config_path, &state) {
            Ok(()) => tracing::info!(path = %config_path.display(), "configuration reload complete"),
            Err(error) => tracing::error!(
                path = %config_path.display(),
                error = ?error,
                "failed to reload configuration; retaining previous state"
            ),
        }
    }
}

fn resolve_listener_addr(server: &ServerConfig) -> Result<SocketAddr> {
    if let Ok(ip) = server.host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, server.port));
    }

    let mut addrs = (server.host.as_str(), server.port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve listener host `{}`", server.host))?;
    addrs
        .next()
        .context("listener host resolved to no addresses")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl+c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => tracing::warn!(%error, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}

fn load_env_file() -> anyhow::Result<()> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(dotenvy::Error::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
