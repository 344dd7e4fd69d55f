use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use urpcd::codec::{Value, WireFormat};
use urpcd::config::Config;
use urpcd::dispatch::{serve_connection, ServerContext};
use urpcd::registry::{FnHandler, Registry};
use urpcd::rpc::RpcClient;

#[derive(Parser)]
#[command(name = "urpcd", about = "Authenticated, encrypted RPC channel daemon and client", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Port to listen on (server) or connect to (client).
    #[arg(long, env = "URPC_PORT")]
    port: Option<u16>,

    /// Data directory backing `ls`/`rm`/`put`/`get` and config.toml.
    #[arg(long, env = "URPC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Shared secret key, as 32 hex characters (16 bytes). Prefer
    /// $URPC_SECRET_KEY over this flag outside of local development.
    #[arg(long)]
    secret_key: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "URPC_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily), in addition to stdout.
    #[arg(long, env = "URPC_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the RPC server (default when no subcommand is given).
    Serve {
        /// Expose the `ls`/`rm`/`put`/`get`/`eval`/`exec`/webrepl procedures.
        #[arg(long)]
        enable_mgmt_api: bool,

        /// Absolute session lifetime in seconds (0 disables expiry).
        #[arg(long)]
        session_lifetime_sec: Option<u64>,

        /// Wire format for RPC payloads: "msgpack" or "json".
        #[arg(long)]
        wire_format: Option<String>,
    },
    /// Call a single procedure on a running server and print its result.
    Call {
        /// Server address, e.g. 127.0.0.1:8080.
        address: SocketAddr,
        /// Procedure name.
        method: String,
        /// Positional arguments, each parsed as an integer, float, or string.
        #[arg(long = "arg")]
        args: Vec<String>,
    },
    /// Print the server's registered procedure names (`_dir`).
    Dir {
        /// Server address, e.g. 127.0.0.1:8080.
        address: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log.clone().unwrap_or_else(|| "info".to_string());
    let _log_guard = setup_logging(&log_level, args.log_file.as_deref());

    match args.command {
        Some(Command::Call { address, method, args: call_args }) => {
            run_call(args.secret_key, address, method, call_args).await
        }
        Some(Command::Dir { address }) => run_dir(args.secret_key, address).await,
        Some(Command::Serve {
            enable_mgmt_api,
            session_lifetime_sec,
            wire_format,
        }) => {
            run_server(
                args.port,
                args.data_dir,
                args.secret_key,
                Some(enable_mgmt_api),
                session_lifetime_sec,
                wire_format,
                args.log,
            )
            .await
        }
        None => run_server(args.port, args.data_dir, args.secret_key, None, None, None, args.log).await,
    }
}

/// Initializes the tracing subscriber. If `log_file` is set, logs go to both
/// stdout and a daily-rolling file. Returns a `WorkerGuard` that must stay
/// alive for the process lifetime.
///
/// Falls back to stdout-only logging with a warning if the log directory
/// cannot be created — never panics on a bad log path.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("urpcd.log"));

        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(log_level))
            .with(tracing_subscriber::fmt::layer().compact())
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .init();

        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}

async fn run_server(
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    secret_key: Option<String>,
    enable_mgmt_api: Option<bool>,
    session_lifetime_sec: Option<u64>,
    wire_format: Option<String>,
    log: Option<String>,
) -> Result<()> {
    let config = Config::new(
        port,
        data_dir,
        secret_key,
        enable_mgmt_api,
        session_lifetime_sec,
        wire_format,
        log,
    )
    .context("failed to load configuration")?;

    info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        enable_mgmt_api = config.enable_mgmt_api,
        wire_format = ?config.wire_format,
        "urpcd starting"
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;

    let registry = Registry::new();
    register_demo_procedures(&registry);
    if config.enable_mgmt_api {
        urpcd::procedures::register(&registry, config.data_dir.clone());
        info!("management procedure surface enabled");
    }

    let ctx = Arc::new(ServerContext {
        secret_key: config.secret_key,
        registry,
        wire_format: config.wire_format,
        session_lifetime: config.session_lifetime,
        http_handler: None,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening for RPC connections");

    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received, stopping server");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(err = %e, "accept error");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    info!(%peer, "connection accepted");
                    serve_connection(stream, ctx).await;
                    info!(%peer, "connection closed");
                });
            }
        }
    }

    Ok(())
}

/// Registers a small pair of demonstration procedures so a freshly started
/// server has something to call beyond the management surface.
fn register_demo_procedures(registry: &Registry) {
    registry.register(
        "add",
        FnHandler(|args, _kwargs| {
            let a = args.get(0).and_then(|v| v.as_i64()).unwrap_or(0);
            let b = args.get(1).and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(Value::Integer((a + b).into()))
        }),
    );
    registry.register(
        "echo",
        FnHandler(|args, _kwargs| Ok(args.into_iter().next().unwrap_or(Value::Nil))),
    );
}

async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn run_call(
    secret_key: Option<String>,
    address: SocketAddr,
    method: String,
    raw_args: Vec<String>,
) -> Result<()> {
    let secret_key = require_secret_key(secret_key)?;
    let client = RpcClient::connect(address, secret_key, WireFormat::MsgPack, true)
        .await
        .context("failed to connect")?;

    let args: Vec<Value> = raw_args.iter().map(|s| parse_arg(s)).collect();
    let result = client
        .call(&method, args, Vec::new())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    println!("{}", describe(&result));
    Ok(())
}

async fn run_dir(secret_key: Option<String>, address: SocketAddr) -> Result<()> {
    let secret_key = require_secret_key(secret_key)?;
    let client = RpcClient::connect(address, secret_key, WireFormat::MsgPack, false)
        .await
        .context("failed to connect")?;
    for name in client.methods() {
        println!("{name}");
    }
    Ok(())
}

fn require_secret_key(secret_key: Option<String>) -> Result<[u8; 16]> {
    let hex_str = secret_key
        .or_else(|| std::env::var("URPC_SECRET_KEY").ok())
        .context("no secret key supplied (use --secret-key or $URPC_SECRET_KEY)")?;
    let bytes = hex::decode(hex_str.trim()).context("secret key must be hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("secret key must be exactly 16 bytes"))
}

/// Best-effort parse of a CLI argument into a wire value: integer, float,
/// then string, in that order.
fn parse_arg(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Integer(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::F64(f);
    }
    Value::String(raw.to_string().into())
}

fn describe(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}
