//! Shared helpers for integration tests
#![allow(dead_code)]

pub mod mock_server;

use std::time::Duration;
use txmail_common::config::SmtpServerConfig;

pub use mock_server::MockSmtpServer;

/// Plaintext, unauthenticated server config pointing at `server`
pub fn server_config(server: &MockSmtpServer) -> SmtpServerConfig {
    let mut config = SmtpServerConfig::new("127.0.0.1", server.port());
    config.tls_type = "none".to_string();
    config.hello_hostname = "client.test".to_string();
    config.io_timeout_ms = 5_000;
    config.connect_timeout_ms = 2_000;
    config
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
