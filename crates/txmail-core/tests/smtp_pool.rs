//! SMTP client and connection pool against a loopback server

mod support;

use pretty_assertions::assert_eq;
use std::time::Duration;
use support::{server_config, wait_until, MockSmtpServer};
use txmail_common::config::SmtpServerConfig;
use txmail_core::smtp::{Endpoint, Envelope, PoolSettings, SmtpClient, SmtpError, SmtpPool};

fn pool_for(config: &SmtpServerConfig) -> SmtpPool {
    let endpoint = Endpoint::from_config(config).unwrap();
    SmtpPool::new(endpoint, PoolSettings::from(config))
}

fn envelope(to: &str) -> Envelope {
    Envelope {
        from: "sender@example.com".to_string(),
        recipients: vec![to.to_string()],
        data: b"Subject: hi\r\n\r\nHello\r\n.leading dot\r\n".to_vec(),
    }
}

#[tokio::test]
async fn test_client_transaction() {
    let server = MockSmtpServer::start().await;
    let endpoint = Endpoint::from_config(&server_config(&server)).unwrap();

    let mut client = SmtpClient::connect(&endpoint).await.unwrap();
    assert!(client.capabilities().supports_auth("CRAM-MD5"));

    client
        .send(
            "sender@example.com",
            &["rcpt@example.com".to_string()],
            b"Subject: hi\r\n\r\nHello\r\n.leading dot\r\n",
        )
        .await
        .unwrap();
    client.quit().await;

    let messages = server.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].from, "sender@example.com");
    assert_eq!(messages[0].recipients, vec!["rcpt@example.com".to_string()]);
    assert_eq!(messages[0].data, "Subject: hi\r\n\r\nHello\r\n.leading dot\r\n");

    let commands = server.commands();
    assert_eq!(commands[0], "EHLO client.test");
    assert!(commands.contains(&"MAIL FROM:<sender@example.com>".to_string()));
    assert!(wait_until(Duration::from_secs(1), || server.commands().contains(&"QUIT".to_string())).await);
}

#[tokio::test]
async fn test_auth_mechanisms() {
    for (protocol, mechanism) in [("plain", "PLAIN"), ("login", "LOGIN"), ("cram-md5", "CRAM-MD5")] {
        let server = MockSmtpServer::builder()
            .with_credentials("user@example.com", "s3cret")
            .build()
            .await;

        let mut config = server_config(&server);
        config.auth_protocol = protocol.to_string();
        config.username = "user@example.com".to_string();
        config.password = "s3cret".to_string();

        let pool = pool_for(&config);
        pool.send(envelope("rcpt@example.com")).await.unwrap();

        assert!(
            server.commands().contains(&format!("AUTH-RESULT {} true", mechanism)),
            "{} did not authenticate",
            mechanism
        );
        assert_eq!(server.messages().len(), 1);
        pool.close().await;
    }
}

#[tokio::test]
async fn test_auth_wrong_password() {
    let server = MockSmtpServer::builder()
        .with_credentials("user@example.com", "s3cret")
        .build()
        .await;

    let mut config = server_config(&server);
    config.auth_protocol = "login".to_string();
    config.username = "user@example.com".to_string();
    config.password = "wrong".to_string();

    let endpoint = Endpoint::from_config(&config).unwrap();
    let err = SmtpClient::connect(&endpoint).await.err().unwrap();
    assert!(matches!(err, SmtpError::Auth(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_recipient_rejected_keeps_session() {
    let server = MockSmtpServer::builder()
        .with_rcpt_response(550, "No such user")
        .build()
        .await;
    let pool = pool_for(&server_config(&server));

    let err = pool.send(envelope("nobody@example.com")).await.unwrap_err();
    assert!(matches!(err, SmtpError::Rejected { code: 550, .. }), "got {:?}", err);
    assert!(err.is_permanent());

    // The transaction was reset and the session parked for reuse
    assert!(server.commands().contains(&"RSET".to_string()));
    assert_eq!(pool.idle_count(), 1);
    assert!(server.messages().is_empty());
}

#[tokio::test]
async fn test_sessions_are_reused() {
    let server = MockSmtpServer::start().await;
    let pool = pool_for(&server_config(&server));

    pool.send(envelope("a@example.com")).await.unwrap();
    pool.send(envelope("b@example.com")).await.unwrap();

    assert_eq!(server.connections(), 1);
    assert_eq!(server.messages().len(), 2);
    assert_eq!(pool.idle_count(), 1);
}

#[tokio::test]
async fn test_idle_session_dropped_by_server_is_retried() {
    let server = MockSmtpServer::builder().close_after_message().build().await;
    let pool = pool_for(&server_config(&server));

    pool.send(envelope("a@example.com")).await.unwrap();
    pool.send(envelope("b@example.com")).await.unwrap();

    assert_eq!(server.connections(), 2);
    assert_eq!(server.messages().len(), 2);
}

#[tokio::test]
async fn test_expired_idle_session_is_replaced() {
    let server = MockSmtpServer::start().await;
    let mut config = server_config(&server);
    config.idle_timeout_ms = 50;
    let pool = pool_for(&config);

    pool.send(envelope("a@example.com")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    pool.send(envelope("b@example.com")).await.unwrap();

    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_pool_wait_timeout() {
    let server = MockSmtpServer::builder()
        .with_data_delay(Duration::from_millis(800))
        .build()
        .await;

    let mut config = server_config(&server);
    config.max_conns = 1;
    config.wait_timeout_ms = 50;
    let pool = pool_for(&config);

    let busy = pool.clone();
    let first = tokio::spawn(async move { busy.send(envelope("a@example.com")).await });

    // The only slot is held while the server sits on the DATA reply
    assert!(
        wait_until(Duration::from_secs(2), || server
            .commands()
            .contains(&"DATA".to_string()))
        .await
    );

    let err = pool.send(envelope("b@example.com")).await.unwrap_err();
    assert!(matches!(err, SmtpError::PoolTimeout(_)), "got {:?}", err);

    first.await.unwrap().unwrap();
    assert_eq!(server.messages().len(), 1);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let server = MockSmtpServer::start().await;
    let pool = pool_for(&server_config(&server));

    pool.send(envelope("a@example.com")).await.unwrap();
    pool.close().await;
    pool.close().await;

    assert!(pool.is_closed());
    assert_eq!(pool.idle_count(), 0);
    assert!(matches!(
        pool.send(envelope("b@example.com")).await,
        Err(SmtpError::Closed)
    ));
    assert!(wait_until(Duration::from_secs(1), || server.commands().contains(&"QUIT".to_string())).await);
}
