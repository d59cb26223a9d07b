use std::sync::atomic::Ordering;
use std::time::Duration;

use gangway_proto::router::v1 as pb;
use gangway_router::config::RouterConfig;
use gangway_tests::harness::{
    init_tracing,
    router::TestRouter,
    session::{
        connect, exec_init, open_exec_raw, open_port_forward, open_rsync, session_meta,
        unwrap_status,
    },
};

fn strict_config() -> RouterConfig {
    RouterConfig {
        rendezvous_timeout: Duration::from_secs(5),
        max_session_key_len: 32,
        max_workflow_id_len: 32,
        ..RouterConfig::default()
    }
}

#[tokio::test]
async fn exec_init_rejections() {
    init_tracing();
    let router = TestRouter::spawn(strict_config()).await.unwrap();
    let mut conn = connect(&router.endpoint()).await.unwrap();

    // Empty session key.
    let status =
        unwrap_status(open_exec_raw(&mut conn, exec_init("", pb::StreamRole::Client, &["sh"])).await);
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    // Session key over the configured limit.
    let long_key = "k".repeat(33);
    let status = unwrap_status(
        open_exec_raw(&mut conn, exec_init(&long_key, pb::StreamRole::Client, &["sh"])).await,
    );
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    // Empty command.
    let status =
        unwrap_status(open_exec_raw(&mut conn, exec_init("s1", pb::StreamRole::Client, &[])).await);
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    // Role left unspecified.
    let status = unwrap_status(
        open_exec_raw(&mut conn, exec_init("s1", pb::StreamRole::Unspecified, &["sh"])).await,
    );
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    // Data before init.
    let first = pb::ExecRequest {
        frame: Some(pb::exec_request::Frame::Data(pb::DataFrame {
            payload: vec![1, 2, 3],
        })),
    };
    let status = unwrap_status(open_exec_raw(&mut conn, first).await);
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    // Rejections never create sessions.
    assert_eq!(router.metrics.opened.load(Ordering::Relaxed), 0);
    assert_eq!(router.metrics.rejected.load(Ordering::Relaxed), 5);
}

#[tokio::test]
async fn port_forward_init_rejections() {
    init_tracing();
    let router = TestRouter::spawn(strict_config()).await.unwrap();
    let mut conn = connect(&router.endpoint()).await.unwrap();

    let status = unwrap_status(
        open_port_forward(&mut conn, "pf1", pb::StreamRole::Client, "sctp", 8080).await,
    );
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    let status =
        unwrap_status(open_port_forward(&mut conn, "pf1", pb::StreamRole::Client, "tcp", 0).await);
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    let status = unwrap_status(
        open_port_forward(&mut conn, "pf1", pb::StreamRole::Client, "udp", 70000).await,
    );
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    // A valid init on the same key still opens a fresh session.
    let (_tx, _rx) = open_port_forward(&mut conn, "pf1", pb::StreamRole::Client, "udp", 53)
        .await
        .unwrap();
    assert_eq!(router.metrics.opened.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn rsync_init_rejections() {
    init_tracing();
    let router = TestRouter::spawn(strict_config()).await.unwrap();
    let mut conn = connect(&router.endpoint()).await.unwrap();

    let manifest = |source: &str, destination: &str, paths: &[&str]| pb::RsyncManifest {
        source: source.to_string(),
        destination: destination.to_string(),
        paths: paths.iter().map(|s| s.to_string()).collect(),
    };

    let status = unwrap_status(
        open_rsync(&mut conn, "rs1", pb::StreamRole::Client, manifest("", "/dst", &[])).await,
    );
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    let status = unwrap_status(
        open_rsync(&mut conn, "rs1", pb::StreamRole::Client, manifest("/src", "", &[])).await,
    );
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    let status = unwrap_status(
        open_rsync(
            &mut conn,
            "rs1",
            pb::StreamRole::Client,
            manifest("/src", "/dst", &["ok", ""]),
        )
        .await,
    );
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    // Missing manifest entirely.
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tx.send(pb::RsyncRequest {
        frame: Some(pb::rsync_request::Frame::Init(pb::RsyncInit {
            meta: Some(session_meta("rs1", pb::StreamRole::Client)),
            manifest: None,
        })),
    })
    .await
    .unwrap();
    let status = unwrap_status(
        conn.rsync(tokio_stream::wrappers::ReceiverStream::new(rx))
            .await
            .map(|response| response.into_inner()),
    );
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert_eq!(router.metrics.opened.load(Ordering::Relaxed), 0);
}
