use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use upstream_bounce::instance::RetryPolicy;
use upstream_bounce::tls::TlsCredentials;
use upstream_bounce::{ControlServer, InstanceRegistry, RegistrySettings};

/// Bounce manager: starts and stops fake upstream servers on demand
#[derive(Parser, Debug)]
#[command(name = "upstream-bounce", version, about)]
struct Args {
    /// Control API port
    #[arg(short, long, env = "BOUNCE_PORT", default_value = "3000")]
    port: u16,

    /// Control API bind host: IPv4 or IPv6 literal, or a hostname
    #[arg(long, env = "BOUNCE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Directory holding internal.key and internal.cert for HTTPS instances
    #[arg(long, env = "TLS_DIR", default_value = "/app")]
    tls_dir: PathBuf,

    /// Pause between bind attempts while a port is in use
    #[arg(long, env = "BIND_RETRY_DELAY_MS", default_value = "50")]
    bind_retry_delay_ms: u64,

    /// Give up binding after this many attempts (default: retry forever)
    #[arg(long, env = "BIND_MAX_ATTEMPTS")]
    bind_max_attempts: Option<u32>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut retry = RetryPolicy::fixed(Duration::from_millis(args.bind_retry_delay_ms));
    if let Some(max) = args.bind_max_attempts {
        retry = retry.with_max_attempts(max);
    }

    let registry = Arc::new(InstanceRegistry::new(RegistrySettings {
        tls: TlsCredentials::in_dir(&args.tls_dir),
        retry,
    }));

    let addr = ControlServer::resolve(&args.host, args.port).await?;

    tracing::info!("upstream-bounce v{}", env!("CARGO_PKG_VERSION"));
    let server = ControlServer::new(addr, Arc::clone(&registry));

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            let closed = registry.reset_all().await;
            tracing::info!("Closed {} instances", closed);
        }
    }

    Ok(())
}
