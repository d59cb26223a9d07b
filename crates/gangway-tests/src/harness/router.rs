use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

use gangway_router::config::RouterConfig;
use gangway_router::metrics::CountingSink;
use gangway_router::service::spawn_router;

/// A router serving on a random port, shut down on drop. The counting
/// metrics sink doubles as the test's view into session accounting.
pub struct TestRouter {
    pub addr: SocketAddr,
    pub metrics: Arc<CountingSink>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestRouter {
    pub async fn spawn(config: RouterConfig) -> Result<Self> {
        let metrics = Arc::new(CountingSink::default());
        let (addr, shutdown_tx) = spawn_router(config, metrics.clone()).await?;
        Ok(Self {
            addr,
            metrics,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }
}

impl Drop for TestRouter {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
