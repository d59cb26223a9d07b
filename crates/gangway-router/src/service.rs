use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

use gangway_proto::router::v1 as pb;
use gangway_proto::router::v1::session_router_server::{SessionRouter, SessionRouterServer};

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::frame::{Frame, FrameSource, StreamSide};
use crate::metrics::{MetricsSink, SessionOutcome};
use crate::ops::{ExecOp, Operation, PortForwardOp, RsyncOp, SessionInit};
use crate::pump;
use crate::registry::{Acquired, RendezvousSlot, SessionRegistry};

pub type FrameStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// The session-rendezvous service. One instance serves every
/// operation; per-session state lives in the registry, which is
/// injected here so tests can run independent instances in parallel.
#[derive(Clone)]
pub struct SessionRouterService {
    registry: Arc<SessionRegistry>,
    metrics: Arc<dyn MetricsSink>,
    config: Arc<RouterConfig>,
    shutdown: CancellationToken,
}

impl SessionRouterService {
    pub fn new(
        config: RouterConfig,
        metrics: Arc<dyn MetricsSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            metrics,
            config: Arc::new(config),
            shutdown,
        }
    }

    /// Wrap into the generated tonic service with message-size caps
    /// applied in both directions.
    pub fn into_service(self) -> SessionRouterServer<Self> {
        let max = self.config.max_message_size;
        SessionRouterServer::new(self)
            .max_decoding_message_size(max)
            .max_encoding_message_size(max)
    }

    /// Drive one stream through the three phases every operation
    /// shares: receive init, rendezvous, pump.
    async fn run_session<O: Operation>(
        &self,
        request: Request<Streaming<O::Request>>,
    ) -> Result<Response<FrameStream<O::Response>>, Status> {
        let mut inbound = request.into_inner();

        let first = inbound
            .next()
            .await
            .ok_or_else(|| Status::invalid_argument("empty stream"))?
            .map_err(|e| Status::internal(e.to_string()))?;

        let init = match O::parse_init(first, &self.config) {
            Ok(init) => init,
            Err(err) => {
                self.metrics.stream_rejected(O::NAME, err.code());
                tracing::debug!(op = O::NAME, code = err.code(), %err, "stream rejected");
                return Err(err.to_status());
            }
        };

        let (tx, mut rx) = mpsc::channel::<Result<Frame, Status>>(self.config.forward_buffer);
        let source: FrameSource = Box::pin(inbound.filter_map(|item| match item {
            Ok(request) => O::request_frame(request).map(Ok),
            Err(status) => Some(Err(status)),
        }));
        let handle = StreamSide { source, sink: tx };

        match self
            .registry
            .acquire_or_join(&init.session_key, init.side, handle)
        {
            Ok(Acquired::First(slot)) => {
                self.metrics.session_opened(O::NAME);
                tracing::debug!(
                    op = O::NAME,
                    session_key = %init.session_key,
                    side = init.side.as_str(),
                    "waiting for partner"
                );
                self.spawn_rendezvous_waiter::<O>(init, slot);
            }
            Ok(Acquired::Second {
                slot,
                client,
                agent,
            }) => {
                let waited = slot.created_at().elapsed();
                self.metrics.session_paired(O::NAME, waited);
                tracing::info!(
                    op = O::NAME,
                    session_key = %init.session_key,
                    waited_ms = waited.as_millis() as u64,
                    "session paired"
                );
                self.spawn_pump::<O>(init, slot, client, agent);
            }
            Err(err) => {
                self.metrics.stream_rejected(O::NAME, err.code());
                tracing::debug!(
                    op = O::NAME,
                    session_key = %init.session_key,
                    code = err.code(),
                    "stream rejected"
                );
                return Err(err.to_status());
            }
        }

        let outbound = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item.map(O::response);
            }
        };
        Ok(Response::new(Box::pin(outbound)))
    }

    /// First side in: hold the stream open until the partner arrives
    /// or the rendezvous window elapses.
    fn spawn_rendezvous_waiter<O: Operation>(&self, init: SessionInit, slot: Arc<RendezvousSlot>) {
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let window = self.config.rendezvous_timeout;
        tokio::spawn(async move {
            if slot.wait_paired(window).await {
                // The joining side's task owns the pump from here.
                return;
            }
            // Abandon loses if the partner arrived in the same instant;
            // the winner delivers the timeout on the waiting stream.
            let Some(handle) = registry.abandon(&slot) else {
                return;
            };
            let err = RouterError::RendezvousTimeout(window);
            let _ = handle.sink.try_send(Err(err.to_status()));
            metrics.session_closed(
                O::NAME,
                SessionOutcome::RendezvousTimeout,
                slot.created_at().elapsed(),
                0,
                0,
            );
            tracing::info!(
                op = O::NAME,
                session_key = %init.session_key,
                window_ms = window.as_millis() as u64,
                "rendezvous timed out"
            );
        });
    }

    /// Second side in: run the pump, then release and account exactly
    /// once.
    fn spawn_pump<O: Operation>(
        &self,
        init: SessionInit,
        slot: Arc<RendezvousSlot>,
        client: StreamSide,
        agent: StreamSide,
    ) {
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let send_timeout = self.config.stream_send_timeout;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            // Both sides learn the partner arrived before data flows;
            // the channels are empty here so this cannot fail.
            let _ = client.sink.try_send(Ok(Frame::Paired));
            let _ = agent.sink.try_send(Ok(Frame::Paired));

            let report = pump::run(client, agent, send_timeout, shutdown).await;

            if registry.release(&slot) {
                let outcome = report.outcome();
                metrics.session_closed(
                    O::NAME,
                    outcome,
                    slot.created_at().elapsed(),
                    report.client_to_agent.bytes,
                    report.agent_to_client.bytes,
                );
                tracing::info!(
                    op = O::NAME,
                    session_key = %init.session_key,
                    workflow_id = %init.workflow_id,
                    outcome = outcome.as_str(),
                    bytes_client_to_agent = report.client_to_agent.bytes,
                    bytes_agent_to_client = report.agent_to_client.bytes,
                    "session closed"
                );
            }
        });
    }
}

#[tonic::async_trait]
impl SessionRouter for SessionRouterService {
    type ExecStream = FrameStream<pb::ExecResponse>;
    type PortForwardStream = FrameStream<pb::PortForwardResponse>;
    type RsyncStream = FrameStream<pb::RsyncResponse>;

    async fn exec(
        &self,
        request: Request<Streaming<pb::ExecRequest>>,
    ) -> Result<Response<Self::ExecStream>, Status> {
        self.run_session::<ExecOp>(request).await
    }

    async fn port_forward(
        &self,
        request: Request<Streaming<pb::PortForwardRequest>>,
    ) -> Result<Response<Self::PortForwardStream>, Status> {
        self.run_session::<PortForwardOp>(request).await
    }

    async fn rsync(
        &self,
        request: Request<Streaming<pb::RsyncRequest>>,
    ) -> Result<Response<Self::RsyncStream>, Status> {
        self.run_session::<RsyncOp>(request).await
    }
}

/// Serve the router on `127.0.0.1:0` for tests and embedders.
/// Returns the bound address and a shutdown handle.
pub async fn spawn_router(
    config: RouterConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Result<(SocketAddr, oneshot::Sender<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind router")?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let max_concurrent_streams = config.max_concurrent_streams;
    let svc = SessionRouterService::new(config, metrics, shutdown.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        Server::builder()
            .max_concurrent_streams(Some(max_concurrent_streams))
            .add_service(svc.into_service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                let _ = shutdown_rx.await;
                shutdown.cancel();
            })
            .await
            .ok();
    });

    Ok((local_addr, shutdown_tx))
}
