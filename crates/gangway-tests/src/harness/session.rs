use anyhow::{Result, bail};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Status, Streaming};

use gangway_proto::router::v1 as pb;
use gangway_proto::router::v1::session_router_client::SessionRouterClient;

/// Generous bound on every harness read so a broken router fails the
/// test instead of hanging it.
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Unwrap the rejection status from an open attempt. Panics if the
/// router accepted the stream.
pub fn unwrap_status<T>(result: Result<T, Status>) -> Status {
    match result {
        Ok(_) => panic!("expected a rejection status, stream was accepted"),
        Err(status) => status,
    }
}

pub async fn connect(endpoint: &str) -> Result<SessionRouterClient<Channel>> {
    let channel = Channel::from_shared(endpoint.to_string())?.connect().await?;
    Ok(SessionRouterClient::new(channel))
}

pub fn session_meta(key: &str, role: pb::StreamRole) -> pb::SessionMeta {
    pb::SessionMeta {
        session_key: key.to_string(),
        workflow_id: "wf-test".to_string(),
        role: role.into(),
    }
}

pub fn exec_init(key: &str, role: pb::StreamRole, command: &[&str]) -> pb::ExecRequest {
    pb::ExecRequest {
        frame: Some(pb::exec_request::Frame::Init(pb::ExecInit {
            meta: Some(session_meta(key, role)),
            command: command.iter().map(|s| s.to_string()).collect(),
        })),
    }
}

pub fn exec_data(payload: &[u8]) -> pb::ExecRequest {
    pb::ExecRequest {
        frame: Some(pb::exec_request::Frame::Data(pb::DataFrame {
            payload: payload.to_vec(),
        })),
    }
}

pub fn exec_close() -> pb::ExecRequest {
    pb::ExecRequest {
        frame: Some(pb::exec_request::Frame::Close(pb::CloseFrame {})),
    }
}

/// Open an exec stream with an arbitrary first frame, for validation
/// tests. The request sender is returned alongside the stream so the
/// RPC stays open as long as the caller holds it.
pub async fn open_exec_raw(
    client: &mut SessionRouterClient<Channel>,
    first: pb::ExecRequest,
) -> Result<(mpsc::Sender<pb::ExecRequest>, Streaming<pb::ExecResponse>), Status> {
    let (tx, rx) = mpsc::channel(64);
    tx.send(first)
        .await
        .map_err(|_| Status::cancelled("request channel closed"))?;
    let inbound = client.exec(ReceiverStream::new(rx)).await?.into_inner();
    Ok((tx, inbound))
}

/// One half of an exec session under test: a request sender plus the
/// response stream coming back from the router.
pub struct ExecSide {
    tx: mpsc::Sender<pb::ExecRequest>,
    inbound: Streaming<pb::ExecResponse>,
}

impl ExecSide {
    /// Open an exec stream and send its init frame. Fails with the
    /// rejection status for invalid or duplicate inits.
    pub async fn open(
        client: &mut SessionRouterClient<Channel>,
        key: &str,
        role: pb::StreamRole,
    ) -> Result<Self, Status> {
        let (tx, inbound) =
            open_exec_raw(client, exec_init(key, role, &["bash", "-l"])).await?;
        Ok(Self { tx, inbound })
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.tx.send(exec_data(payload)).await.is_err() {
            bail!("request stream closed");
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        if self.tx.send(exec_close()).await.is_err() {
            bail!("request stream closed");
        }
        Ok(())
    }

    /// Next frame from the router; `Ok(None)` is a clean stream end.
    pub async fn next_frame(&mut self) -> Result<Option<pb::exec_response::Frame>, Status> {
        match timeout(IO_TIMEOUT, self.inbound.message()).await {
            Ok(Ok(Some(response))) => Ok(response.frame),
            Ok(Ok(None)) => Ok(None),
            Ok(Err(status)) => Err(status),
            Err(_) => Err(Status::deadline_exceeded("harness: no frame within timeout")),
        }
    }

    pub async fn expect_paired(&mut self) -> Result<()> {
        match self.next_frame().await {
            Ok(Some(pb::exec_response::Frame::Paired(_))) => Ok(()),
            other => bail!("expected paired frame, got {other:?}"),
        }
    }

    /// Collect forwarded payload bytes until `count` have arrived.
    pub async fn collect_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut collected = Vec::new();
        while collected.len() < count {
            match self.next_frame().await {
                Ok(Some(pb::exec_response::Frame::Data(data))) => collected.extend(data.payload),
                other => bail!("expected data frame, got {other:?}"),
            }
        }
        Ok(collected)
    }

    /// Collect forwarded payload bytes until the close frame.
    pub async fn collect_until_close(&mut self) -> Result<Vec<u8>> {
        let mut collected = Vec::new();
        loop {
            match self.next_frame().await {
                Ok(Some(pb::exec_response::Frame::Data(data))) => collected.extend(data.payload),
                Ok(Some(pb::exec_response::Frame::Close(_))) => return Ok(collected),
                other => bail!("expected data or close frame, got {other:?}"),
            }
        }
    }

    /// Drain until the stream fails, returning the terminal status.
    pub async fn expect_error_status(&mut self) -> Result<Status> {
        loop {
            match self.next_frame().await {
                Ok(Some(_)) => continue,
                Ok(None) => bail!("stream ended cleanly, expected an error status"),
                Err(status) => return Ok(status),
            }
        }
    }

    /// Drain until an error frame arrives, returning its code.
    pub async fn expect_error_frame(&mut self) -> Result<String> {
        loop {
            match self.next_frame().await {
                Ok(Some(pb::exec_response::Frame::Error(err))) => return Ok(err.code),
                Ok(Some(_)) => continue,
                other => bail!("expected error frame, got {other:?}"),
            }
        }
    }
}

pub async fn open_port_forward(
    client: &mut SessionRouterClient<Channel>,
    key: &str,
    role: pb::StreamRole,
    protocol: &str,
    port: u32,
) -> Result<(mpsc::Sender<pb::PortForwardRequest>, Streaming<pb::PortForwardResponse>), Status> {
    let (tx, rx) = mpsc::channel(16);
    let init = pb::PortForwardRequest {
        frame: Some(pb::port_forward_request::Frame::Init(pb::PortForwardInit {
            meta: Some(session_meta(key, role)),
            protocol: protocol.to_string(),
            port,
        })),
    };
    tx.send(init)
        .await
        .map_err(|_| Status::cancelled("request channel closed"))?;
    let inbound = client.port_forward(ReceiverStream::new(rx)).await?.into_inner();
    Ok((tx, inbound))
}

pub async fn open_rsync(
    client: &mut SessionRouterClient<Channel>,
    key: &str,
    role: pb::StreamRole,
    manifest: pb::RsyncManifest,
) -> Result<(mpsc::Sender<pb::RsyncRequest>, Streaming<pb::RsyncResponse>), Status> {
    let (tx, rx) = mpsc::channel(16);
    let init = pb::RsyncRequest {
        frame: Some(pb::rsync_request::Frame::Init(pb::RsyncInit {
            meta: Some(session_meta(key, role)),
            manifest: Some(manifest),
        })),
    };
    tx.send(init)
        .await
        .map_err(|_| Status::cancelled("request channel closed"))?;
    let inbound = client.rsync(ReceiverStream::new(rx)).await?.into_inner();
    Ok((tx, inbound))
}

pub async fn next_port_forward_frame(
    inbound: &mut Streaming<pb::PortForwardResponse>,
) -> Result<Option<pb::port_forward_response::Frame>, Status> {
    match timeout(IO_TIMEOUT, inbound.message()).await {
        Ok(Ok(Some(response))) => Ok(response.frame),
        Ok(Ok(None)) => Ok(None),
        Ok(Err(status)) => Err(status),
        Err(_) => Err(Status::deadline_exceeded("harness: no frame within timeout")),
    }
}

pub async fn next_rsync_frame(
    inbound: &mut Streaming<pb::RsyncResponse>,
) -> Result<Option<pb::rsync_response::Frame>, Status> {
    match timeout(IO_TIMEOUT, inbound.message()).await {
        Ok(Ok(Some(response))) => Ok(response.frame),
        Ok(Ok(None)) => Ok(None),
        Ok(Err(status)) => Err(status),
        Err(_) => Err(Status::deadline_exceeded("harness: no frame within timeout")),
    }
}
