use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use upstream_bounce::config::UpstreamEnv;
use upstream_bounce::instance::{RetryPolicy, UpstreamInstance};
use upstream_bounce::tls::TlsCredentials;

/// Single fake upstream configured from INSTANCE_NUMBER, CLUSTER_NAME,
/// RESPONSE_CODE and friends
#[derive(Parser, Debug)]
#[command(name = "fake-upstream", version, about)]
struct Args {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Directory holding internal.key and internal.cert when USE_HTTPS=https
    #[arg(long, env = "TLS_DIR", default_value = "/app")]
    tls_dir: PathBuf,

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

    let env = UpstreamEnv::from_env().context("invalid upstream environment")?;
    let config = env.into_instance_config(args.port);

    let instance = UpstreamInstance::start(
        config,
        &TlsCredentials::in_dir(&args.tls_dir),
        RetryPolicy::default(),
    )
    .await
    .context("failed to start upstream")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    instance.stop().await?;

    Ok(())
}
