use gangway_proto::router::v1 as pb;

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::frame::Frame;
use crate::registry::SessionSide;

/// Validated init fields shared by every operation.
#[derive(Debug, Clone)]
pub struct SessionInit {
    pub session_key: String,
    pub workflow_id: String,
    pub side: SessionSide,
}

/// One streaming RPC shape. Everything outside the init payload is
/// identical across exec, port-forward, and rsync, so the rendezvous
/// and pump machinery is written once against this trait; the three
/// implementations only parse, validate, and convert messages.
pub trait Operation: Send + Sync + 'static {
    const NAME: &'static str;
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Parse and validate the first message of the stream.
    fn parse_init(first: Self::Request, config: &RouterConfig) -> Result<SessionInit, RouterError>;

    /// Map a follow-up message into a session frame. Stray init frames
    /// map to `None` and are ignored.
    fn request_frame(request: Self::Request) -> Option<Frame>;

    /// Wrap a session frame for this operation's response stream.
    fn response(frame: Frame) -> Self::Response;
}

fn validate_meta(
    meta: Option<pb::SessionMeta>,
    config: &RouterConfig,
) -> Result<SessionInit, RouterError> {
    let meta = meta.ok_or_else(|| RouterError::InvalidInit("missing session metadata".into()))?;
    if meta.session_key.is_empty() {
        return Err(RouterError::InvalidInit("session_key must not be empty".into()));
    }
    if meta.session_key.len() > config.max_session_key_len {
        return Err(RouterError::InvalidInit(format!(
            "session_key exceeds {} bytes",
            config.max_session_key_len
        )));
    }
    if meta.workflow_id.len() > config.max_workflow_id_len {
        return Err(RouterError::InvalidInit(format!(
            "workflow_id exceeds {} bytes",
            config.max_workflow_id_len
        )));
    }
    let side = match meta.role() {
        pb::StreamRole::Client => SessionSide::Client,
        pb::StreamRole::Agent => SessionSide::Agent,
        pb::StreamRole::Unspecified => {
            return Err(RouterError::InvalidInit(
                "role must be client or agent".into(),
            ));
        }
    };
    Ok(SessionInit {
        session_key: meta.session_key,
        workflow_id: meta.workflow_id,
        side,
    })
}

pub struct ExecOp;

impl Operation for ExecOp {
    const NAME: &'static str = "exec";
    type Request = pb::ExecRequest;
    type Response = pb::ExecResponse;

    fn parse_init(first: pb::ExecRequest, config: &RouterConfig) -> Result<SessionInit, RouterError> {
        let Some(pb::exec_request::Frame::Init(init)) = first.frame else {
            return Err(RouterError::InvalidInit(
                "first exec frame must be init".into(),
            ));
        };
        if init.command.is_empty() {
            return Err(RouterError::InvalidInit(
                "exec command must not be empty".into(),
            ));
        }
        validate_meta(init.meta, config)
    }

    fn request_frame(request: pb::ExecRequest) -> Option<Frame> {
        match request.frame? {
            pb::exec_request::Frame::Data(data) => Some(Frame::Data(data.payload)),
            pb::exec_request::Frame::Close(_) => Some(Frame::Close),
            pb::exec_request::Frame::Error(err) => Some(Frame::Error {
                code: err.code,
                message: err.message,
            }),
            pb::exec_request::Frame::Init(_) => None,
        }
    }

    fn response(frame: Frame) -> pb::ExecResponse {
        let frame = match frame {
            Frame::Paired => pb::exec_response::Frame::Paired(pb::PairedFrame {}),
            Frame::Data(payload) => pb::exec_response::Frame::Data(pb::DataFrame { payload }),
            Frame::Close => pb::exec_response::Frame::Close(pb::CloseFrame {}),
            Frame::Error { code, message } => {
                pb::exec_response::Frame::Error(pb::ErrorFrame { code, message })
            }
        };
        pb::ExecResponse { frame: Some(frame) }
    }
}

pub struct PortForwardOp;

impl Operation for PortForwardOp {
    const NAME: &'static str = "port_forward";
    type Request = pb::PortForwardRequest;
    type Response = pb::PortForwardResponse;

    fn parse_init(
        first: pb::PortForwardRequest,
        config: &RouterConfig,
    ) -> Result<SessionInit, RouterError> {
        let Some(pb::port_forward_request::Frame::Init(init)) = first.frame else {
            return Err(RouterError::InvalidInit(
                "first port-forward frame must be init".into(),
            ));
        };
        let protocol = init.protocol.to_ascii_lowercase();
        if protocol != "tcp" && protocol != "udp" {
            return Err(RouterError::InvalidInit(format!(
                "protocol must be tcp or udp, got {:?}",
                init.protocol
            )));
        }
        if init.port == 0 || init.port > u32::from(u16::MAX) {
            return Err(RouterError::InvalidInit(format!(
                "port must be within 1-65535, got {}",
                init.port
            )));
        }
        validate_meta(init.meta, config)
    }

    fn request_frame(request: pb::PortForwardRequest) -> Option<Frame> {
        match request.frame? {
            pb::port_forward_request::Frame::Data(data) => Some(Frame::Data(data.payload)),
            pb::port_forward_request::Frame::Close(_) => Some(Frame::Close),
            pb::port_forward_request::Frame::Error(err) => Some(Frame::Error {
                code: err.code,
                message: err.message,
            }),
            pb::port_forward_request::Frame::Init(_) => None,
        }
    }

    fn response(frame: Frame) -> pb::PortForwardResponse {
        let frame = match frame {
            Frame::Paired => pb::port_forward_response::Frame::Paired(pb::PairedFrame {}),
            Frame::Data(payload) => {
                pb::port_forward_response::Frame::Data(pb::DataFrame { payload })
            }
            Frame::Close => pb::port_forward_response::Frame::Close(pb::CloseFrame {}),
            Frame::Error { code, message } => {
                pb::port_forward_response::Frame::Error(pb::ErrorFrame { code, message })
            }
        };
        pb::PortForwardResponse { frame: Some(frame) }
    }
}

pub struct RsyncOp;

impl Operation for RsyncOp {
    const NAME: &'static str = "rsync";
    type Request = pb::RsyncRequest;
    type Response = pb::RsyncResponse;

    fn parse_init(
        first: pb::RsyncRequest,
        config: &RouterConfig,
    ) -> Result<SessionInit, RouterError> {
        let Some(pb::rsync_request::Frame::Init(init)) = first.frame else {
            return Err(RouterError::InvalidInit(
                "first rsync frame must be init".into(),
            ));
        };
        let manifest = init
            .manifest
            .ok_or_else(|| RouterError::InvalidInit("missing rsync manifest".into()))?;
        if manifest.source.is_empty() {
            return Err(RouterError::InvalidInit(
                "manifest source must not be empty".into(),
            ));
        }
        if manifest.destination.is_empty() {
            return Err(RouterError::InvalidInit(
                "manifest destination must not be empty".into(),
            ));
        }
        if manifest.paths.iter().any(|path| path.is_empty()) {
            return Err(RouterError::InvalidInit(
                "manifest paths must not contain empty entries".into(),
            ));
        }
        validate_meta(init.meta, config)
    }

    fn request_frame(request: pb::RsyncRequest) -> Option<Frame> {
        match request.frame? {
            pb::rsync_request::Frame::Data(data) => Some(Frame::Data(data.payload)),
            pb::rsync_request::Frame::Close(_) => Some(Frame::Close),
            pb::rsync_request::Frame::Error(err) => Some(Frame::Error {
                code: err.code,
                message: err.message,
            }),
            pb::rsync_request::Frame::Init(_) => None,
        }
    }

    fn response(frame: Frame) -> pb::RsyncResponse {
        let frame = match frame {
            Frame::Paired => pb::rsync_response::Frame::Paired(pb::PairedFrame {}),
            Frame::Data(payload) => pb::rsync_response::Frame::Data(pb::DataFrame { payload }),
            Frame::Close => pb::rsync_response::Frame::Close(pb::CloseFrame {}),
            Frame::Error { code, message } => {
                pb::rsync_response::Frame::Error(pb::ErrorFrame { code, message })
            }
        };
        pb::RsyncResponse { frame: Some(frame) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str, role: pb::StreamRole) -> Option<pb::SessionMeta> {
        Some(pb::SessionMeta {
            session_key: key.to_string(),
            workflow_id: "wf-1".to_string(),
            role: role.into(),
        })
    }

    fn exec_init(key: &str, role: pb::StreamRole, command: &[&str]) -> pb::ExecRequest {
        pb::ExecRequest {
            frame: Some(pb::exec_request::Frame::Init(pb::ExecInit {
                meta: meta(key, role),
                command: command.iter().map(|s| s.to_string()).collect(),
            })),
        }
    }

    #[test]
    fn exec_init_accepted() {
        let config = RouterConfig::default();
        let init = ExecOp::parse_init(
            exec_init("s1", pb::StreamRole::Client, &["bash", "-l"]),
            &config,
        )
        .unwrap();
        assert_eq!(init.session_key, "s1");
        assert_eq!(init.side, SessionSide::Client);
    }

    #[test]
    fn exec_rejects_empty_command() {
        let config = RouterConfig::default();
        let err = ExecOp::parse_init(exec_init("s1", pb::StreamRole::Client, &[]), &config)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INIT");
    }

    #[test]
    fn exec_rejects_data_before_init() {
        let config = RouterConfig::default();
        let first = pb::ExecRequest {
            frame: Some(pb::exec_request::Frame::Data(pb::DataFrame {
                payload: vec![1, 2, 3],
            })),
        };
        assert!(ExecOp::parse_init(first, &config).is_err());
    }

    #[test]
    fn empty_session_key_rejected() {
        let config = RouterConfig::default();
        assert!(
            ExecOp::parse_init(exec_init("", pb::StreamRole::Client, &["sh"]), &config).is_err()
        );
    }

    #[test]
    fn oversized_session_key_rejected() {
        let config = RouterConfig {
            max_session_key_len: 16,
            ..RouterConfig::default()
        };
        let long_key = "k".repeat(17);
        assert!(
            ExecOp::parse_init(
                exec_init(&long_key, pb::StreamRole::Client, &["sh"]),
                &config
            )
            .is_err()
        );
    }

    #[test]
    fn oversized_workflow_id_rejected() {
        let config = RouterConfig {
            max_workflow_id_len: 4,
            ..RouterConfig::default()
        };
        let first = pb::ExecRequest {
            frame: Some(pb::exec_request::Frame::Init(pb::ExecInit {
                meta: Some(pb::SessionMeta {
                    session_key: "s1".to_string(),
                    workflow_id: "wf-123456".to_string(),
                    role: pb::StreamRole::Client.into(),
                }),
                command: vec!["sh".to_string()],
            })),
        };
        assert!(ExecOp::parse_init(first, &config).is_err());
    }

    #[test]
    fn unspecified_role_rejected() {
        let config = RouterConfig::default();
        assert!(
            ExecOp::parse_init(
                exec_init("s1", pb::StreamRole::Unspecified, &["sh"]),
                &config
            )
            .is_err()
        );
    }

    fn port_forward_init(protocol: &str, port: u32) -> pb::PortForwardRequest {
        pb::PortForwardRequest {
            frame: Some(pb::port_forward_request::Frame::Init(pb::PortForwardInit {
                meta: meta("s1", pb::StreamRole::Agent),
                protocol: protocol.to_string(),
                port,
            })),
        }
    }

    #[test]
    fn port_forward_accepts_tcp_and_udp_any_case() {
        let config = RouterConfig::default();
        for protocol in ["tcp", "udp", "TCP", "Udp"] {
            let init =
                PortForwardOp::parse_init(port_forward_init(protocol, 8080), &config).unwrap();
            assert_eq!(init.side, SessionSide::Agent);
        }
    }

    #[test]
    fn port_forward_rejects_bad_protocol() {
        let config = RouterConfig::default();
        assert!(PortForwardOp::parse_init(port_forward_init("sctp", 8080), &config).is_err());
        assert!(PortForwardOp::parse_init(port_forward_init("", 8080), &config).is_err());
    }

    #[test]
    fn port_forward_rejects_out_of_range_port() {
        let config = RouterConfig::default();
        assert!(PortForwardOp::parse_init(port_forward_init("tcp", 0), &config).is_err());
        assert!(PortForwardOp::parse_init(port_forward_init("tcp", 65536), &config).is_err());
        assert!(PortForwardOp::parse_init(port_forward_init("tcp", 65535), &config).is_ok());
    }

    fn rsync_init(source: &str, destination: &str, paths: &[&str]) -> pb::RsyncRequest {
        pb::RsyncRequest {
            frame: Some(pb::rsync_request::Frame::Init(pb::RsyncInit {
                meta: meta("s1", pb::StreamRole::Client),
                manifest: Some(pb::RsyncManifest {
                    source: source.to_string(),
                    destination: destination.to_string(),
                    paths: paths.iter().map(|s| s.to_string()).collect(),
                }),
            })),
        }
    }

    #[test]
    fn rsync_manifest_validated() {
        let config = RouterConfig::default();
        assert!(rsync_ok(&config, rsync_init("/src", "/dst", &["a", "b/c"])));
        assert!(rsync_ok(&config, rsync_init("/src", "/dst", &[])));
        assert!(!rsync_ok(&config, rsync_init("", "/dst", &[])));
        assert!(!rsync_ok(&config, rsync_init("/src", "", &[])));
        assert!(!rsync_ok(&config, rsync_init("/src", "/dst", &["a", ""])));

        let missing = pb::RsyncRequest {
            frame: Some(pb::rsync_request::Frame::Init(pb::RsyncInit {
                meta: meta("s1", pb::StreamRole::Client),
                manifest: None,
            })),
        };
        assert!(RsyncOp::parse_init(missing, &config).is_err());
    }

    fn rsync_ok(config: &RouterConfig, request: pb::RsyncRequest) -> bool {
        RsyncOp::parse_init(request, config).is_ok()
    }

    #[test]
    fn stray_init_maps_to_no_frame() {
        let request = exec_init("s1", pb::StreamRole::Client, &["sh"]);
        assert!(ExecOp::request_frame(request).is_none());
    }

    #[test]
    fn data_and_close_frames_convert() {
        let data = pb::ExecRequest {
            frame: Some(pb::exec_request::Frame::Data(pb::DataFrame {
                payload: vec![7, 8],
            })),
        };
        assert_eq!(ExecOp::request_frame(data), Some(Frame::Data(vec![7, 8])));

        let close = pb::ExecRequest {
            frame: Some(pb::exec_request::Frame::Close(pb::CloseFrame {})),
        };
        assert_eq!(ExecOp::request_frame(close), Some(Frame::Close));

        match ExecOp::response(Frame::Paired).frame {
            Some(pb::exec_response::Frame::Paired(_)) => {}
            other => panic!("expected paired frame, got {other:?}"),
        }
    }
}
