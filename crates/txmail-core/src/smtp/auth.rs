//! SMTP authentication: PLAIN, LOGIN and CRAM-MD5

use super::client::SmtpClient;
use super::error::{SmtpError, SmtpResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use tracing::debug;
use txmail_common::config::AuthProtocol;

type HmacMd5 = Hmac<md5::Md5>;

/// Authenticate the session with the configured mechanism
pub async fn authenticate(
    client: &mut SmtpClient,
    protocol: AuthProtocol,
    username: &str,
    password: &str,
) -> SmtpResult<()> {
    if protocol == AuthProtocol::None {
        return Ok(());
    }

    debug!("Authenticating as {} with {:?}", username, protocol);

    match protocol {
        AuthProtocol::None => Ok(()),
        AuthProtocol::Plain => auth_plain(client, username, password).await,
        AuthProtocol::Login => auth_login(client, username, password).await,
        AuthProtocol::CramMd5 => auth_cram_md5(client, username, password).await,
    }
}

async fn auth_plain(client: &mut SmtpClient, username: &str, password: &str) -> SmtpResult<()> {
    let reply = client
        .command(&format!("AUTH PLAIN {}", plain_payload(username, password)))
        .await?;

    if reply.is_positive() {
        Ok(())
    } else {
        Err(SmtpError::Auth(format!(
            "AUTH PLAIN failed: {} {}",
            reply.code,
            reply.text()
        )))
    }
}

async fn auth_login(client: &mut SmtpClient, username: &str, password: &str) -> SmtpResult<()> {
    let reply = client.command("AUTH LOGIN").await?;
    if !reply.is_intermediate() {
        return Err(SmtpError::Auth(format!(
            "AUTH LOGIN rejected: {} {}",
            reply.code,
            reply.text()
        )));
    }

    let reply = client.secret(&BASE64.encode(username.as_bytes())).await?;
    if !reply.is_intermediate() {
        return Err(SmtpError::Auth(format!(
            "AUTH LOGIN username rejected: {} {}",
            reply.code,
            reply.text()
        )));
    }

    let reply = client.secret(&BASE64.encode(password.as_bytes())).await?;
    if reply.is_positive() {
        Ok(())
    } else {
        Err(SmtpError::Auth(format!(
            "AUTH LOGIN password rejected: {} {}",
            reply.code,
            reply.text()
        )))
    }
}

async fn auth_cram_md5(client: &mut SmtpClient, username: &str, password: &str) -> SmtpResult<()> {
    let reply = client.command("AUTH CRAM-MD5").await?;
    if !reply.is_intermediate() {
        return Err(SmtpError::Auth(format!(
            "AUTH CRAM-MD5 rejected: {} {}",
            reply.code,
            reply.text()
        )));
    }

    let challenge = BASE64
        .decode(reply.text().trim().as_bytes())
        .map_err(|e| SmtpError::Auth(format!("Invalid CRAM-MD5 challenge: {}", e)))?;

    let reply = client
        .secret(&cram_md5_response(username, password, &challenge))
        .await?;

    if reply.is_positive() {
        Ok(())
    } else {
        Err(SmtpError::Auth(format!(
            "AUTH CRAM-MD5 failed: {} {}",
            reply.code,
            reply.text()
        )))
    }
}

/// base64(`\0user\0password`)
pub fn plain_payload(username: &str, password: &str) -> String {
    BASE64.encode(format!("\0{}\0{}", username, password).as_bytes())
}

/// base64(`user hex(hmac_md5(password, challenge))`)
pub fn cram_md5_response(username: &str, password: &str, challenge: &[u8]) -> String {
    let digest = match HmacMd5::new_from_slice(password.as_bytes()) {
        Ok(mut mac) => {
            mac.update(challenge);
            hex::encode(mac.finalize().into_bytes())
        }
        // HMAC accepts keys of any length
        Err(_) => String::new(),
    };
    BASE64.encode(format!("{} {}", username, digest).as_bytes())
}
