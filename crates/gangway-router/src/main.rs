use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Identity, Server, ServerTlsConfig};

use gangway_proto::router::v1::session_router_server::SessionRouterServer;
use gangway_router::config::RouterConfig;
use gangway_router::metrics::TracingSink;
use gangway_router::service::SessionRouterService;

#[derive(Parser, Debug)]
#[command(author, version, about = "gangway session-rendezvous router")]
struct Args {
    #[arg(long, default_value = "0.0.0.0:50200")]
    listen: String,
    /// Terminate TLS on the router listener.
    #[arg(long)]
    tls: bool,
    #[arg(long, requires = "tls")]
    tls_cert: Option<PathBuf>,
    #[arg(long, requires = "tls")]
    tls_key: Option<PathBuf>,
    /// How long the first side of a session waits for its partner.
    #[arg(long, default_value = "60")]
    rendezvous_timeout_secs: u64,
    /// Bound on every forwarded write toward a destination stream.
    #[arg(long, default_value = "30")]
    stream_send_timeout_secs: u64,
    #[arg(long, default_value = "1000")]
    max_concurrent_streams: u32,
    #[arg(long, default_value = "4194304")]
    max_message_size: usize,
    #[arg(long, default_value = "256")]
    max_session_key_len: usize,
    #[arg(long, default_value = "256")]
    max_workflow_id_len: usize,
    /// Frames buffered per direction before backpressure kicks in.
    #[arg(long, default_value = "64")]
    forward_buffer: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gangway_router=info".into()),
        )
        .init();

    let args = Args::parse();
    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("invalid --listen {}", args.listen))?;

    let config = RouterConfig {
        rendezvous_timeout: Duration::from_secs(args.rendezvous_timeout_secs),
        stream_send_timeout: Duration::from_secs(args.stream_send_timeout_secs),
        max_concurrent_streams: args.max_concurrent_streams,
        max_message_size: args.max_message_size,
        max_session_key_len: args.max_session_key_len,
        max_workflow_id_len: args.max_workflow_id_len,
        forward_buffer: args.forward_buffer.max(1),
    };

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let svc = SessionRouterService::new(config.clone(), Arc::new(TracingSink), shutdown.clone());

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<SessionRouterServer<SessionRouterService>>()
        .await;

    tracing::info!(
        "gangway router listening addr={local_addr} rendezvous_timeout={}s stream_send_timeout={}s max_concurrent_streams={}",
        args.rendezvous_timeout_secs,
        args.stream_send_timeout_secs,
        args.max_concurrent_streams,
    );

    let mut builder = Server::builder()
        // Dead peers that never close are caught by the transport's
        // keepalive, not by a sweeper over the registry.
        .http2_keepalive_interval(Some(Duration::from_secs(60)))
        .http2_keepalive_timeout(Some(Duration::from_secs(20)))
        .max_concurrent_streams(Some(config.max_concurrent_streams));

    if args.tls {
        let cert_path = args.tls_cert.context("--tls requires --tls-cert")?;
        let key_path = args.tls_key.context("--tls requires --tls-key")?;
        let cert = tokio::fs::read(&cert_path)
            .await
            .with_context(|| format!("failed to read {}", cert_path.display()))?;
        let key = tokio::fs::read(&key_path)
            .await
            .with_context(|| format!("failed to read {}", key_path.display()))?;
        builder = builder
            .tls_config(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
            .context("invalid tls config")?;
    }

    builder
        .add_service(health_service)
        .add_service(svc.into_service())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining sessions");
            shutdown.cancel();
        })
        .await
        .context("router server failed")?;

    Ok(())
}
