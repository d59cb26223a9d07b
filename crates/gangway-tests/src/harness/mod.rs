pub mod router;
pub mod session;

use std::time::Duration;

/// Initialize tracing for tests (only once per process).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("gangway_router=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Poll `probe` until it returns true, or the timeout elapses.
pub async fn wait_until<F>(probe: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
