//! Async SMTP protocol engine.
//!
//! Handles the TCP connection, implicit TLS and STARTTLS, EHLO/HELO
//! negotiation, authentication and the MAIL/RCPT/DATA transaction.

use super::auth;
use super::error::{SmtpError, SmtpResult};
use super::reply::{Capabilities, Reply};
use super::tls;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use txmail_common::config::{AuthProtocol, SmtpServerConfig, TlsType};

/// Everything needed to open an authenticated session with one server
#[derive(Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub hello_hostname: String,
    pub tls: TlsType,
    pub auth: AuthProtocol,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    connector: Option<TlsConnector>,
}

impl Endpoint {
    /// Resolve auth and TLS settings; unknown values are configuration errors
    pub fn from_config(config: &SmtpServerConfig) -> txmail_common::Result<Self> {
        let tls = config.tls()?;
        let auth = config.auth()?;
        let connector = match tls {
            TlsType::None => None,
            TlsType::StartTls | TlsType::Tls => {
                Some(tls::create_tls_connector(config.tls_skip_verify))
            }
        };

        let endpoint = Self {
            host: config.host.clone(),
            port: config.port,
            hello_hostname: config.hello_hostname.clone(),
            tls,
            auth,
            username: config.username.clone(),
            password: config.password.clone(),
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
            connector,
        };

        if endpoint.sends_credentials_in_clear() {
            warn!(
                server = %config.display_name(),
                "SMTP credentials will be sent over an unencrypted connection"
            );
        }

        Ok(endpoint)
    }

    /// Authentication over a plaintext session to a non-loopback host
    pub fn sends_credentials_in_clear(&self) -> bool {
        self.auth != AuthProtocol::None && self.tls == TlsType::None && !is_loopback(&self.host)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connector(&self) -> SmtpResult<&TlsConnector> {
        self.connector
            .as_ref()
            .ok_or_else(|| SmtpError::Tls("TLS is not configured for this server".to_string()))
    }
}

fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("auth", &self.auth)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

enum SmtpStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
    /// Transient state while the socket is handed to the TLS handshake
    Detached,
}

fn detached() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "stream detached")
}

impl SmtpStream {
    async fn read_line(&mut self, buf: &mut String) -> std::io::Result<usize> {
        match self {
            SmtpStream::Plain(r) => r.read_line(buf).await,
            SmtpStream::Tls(r) => r.read_line(buf).await,
            SmtpStream::Detached => Err(detached()),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            SmtpStream::Plain(r) => r.get_mut().write_all(data).await,
            SmtpStream::Tls(r) => r.get_mut().write_all(data).await,
            SmtpStream::Detached => Err(detached()),
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            SmtpStream::Plain(r) => r.get_mut().flush().await,
            SmtpStream::Tls(r) => r.get_mut().flush().await,
            SmtpStream::Detached => Err(detached()),
        }
    }
}

/// One open SMTP session
pub struct SmtpClient {
    stream: SmtpStream,
    io_timeout: Duration,
    capabilities: Capabilities,
}

impl SmtpClient {
    /// Connect, negotiate TLS and authenticate
    pub async fn connect(endpoint: &Endpoint) -> SmtpResult<Self> {
        let addr = endpoint.address();
        debug!("Connecting to SMTP server {}", addr);

        let tcp = tokio::time::timeout(endpoint.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SmtpError::Timeout(format!("connecting to {}", addr)))??;

        let stream = match endpoint.tls {
            TlsType::Tls => {
                let tls_stream = tls::handshake(endpoint.connector()?, &endpoint.host, tcp).await?;
                SmtpStream::Tls(Box::new(BufReader::new(tls_stream)))
            }
            TlsType::None | TlsType::StartTls => SmtpStream::Plain(BufReader::new(tcp)),
        };

        let mut client = SmtpClient {
            stream,
            io_timeout: endpoint.io_timeout,
            capabilities: Capabilities::default(),
        };

        let greeting = client.read_reply().await?;
        if greeting.code != 220 {
            return Err(SmtpError::rejected(
                greeting.code,
                format!("Greeting from {}: {}", addr, greeting.text()),
            ));
        }

        client.hello(&endpoint.hello_hostname).await?;

        if endpoint.tls == TlsType::StartTls {
            client.starttls(endpoint).await?;
        }

        auth::authenticate(
            &mut client,
            endpoint.auth,
            &endpoint.username,
            &endpoint.password,
        )
        .await?;

        debug!("SMTP session established with {}", addr);
        Ok(client)
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// EHLO, falling back to HELO
    async fn hello(&mut self, hostname: &str) -> SmtpResult<()> {
        let reply = self.command(&format!("EHLO {}", hostname)).await?;
        if reply.is_positive() {
            self.capabilities = Capabilities::parse(&reply);
            return Ok(());
        }

        debug!("EHLO rejected, trying HELO");
        let reply = self
            .command(&format!("HELO {}", hostname))
            .await?
            .expect_positive("HELO")?;
        self.capabilities = Capabilities::without_extensions(&reply);
        Ok(())
    }

    async fn starttls(&mut self, endpoint: &Endpoint) -> SmtpResult<()> {
        if !self.capabilities.supports("STARTTLS") {
            return Err(SmtpError::Tls(format!(
                "{} does not advertise STARTTLS",
                endpoint.address()
            )));
        }

        let reply = self.command("STARTTLS").await?;
        if reply.code != 220 {
            return Err(SmtpError::Tls(format!("STARTTLS rejected: {}", reply.text())));
        }

        let tcp = match std::mem::replace(&mut self.stream, SmtpStream::Detached) {
            SmtpStream::Plain(reader) => reader.into_inner(),
            other => {
                self.stream = other;
                return Err(SmtpError::Tls("Session is already encrypted".to_string()));
            }
        };

        let tls_stream = tls::handshake(endpoint.connector()?, &endpoint.host, tcp).await?;
        self.stream = SmtpStream::Tls(Box::new(BufReader::new(tls_stream)));

        // RFC 3207: capabilities must be discarded and re-queried
        self.hello(&endpoint.hello_hostname).await
    }

    /// Run one mail transaction
    pub async fn send(&mut self, from: &str, recipients: &[String], data: &[u8]) -> SmtpResult<()> {
        self.command(&format!("MAIL FROM:<{}>", from))
            .await?
            .expect_positive("MAIL FROM")?;

        for rcpt in recipients {
            self.command(&format!("RCPT TO:<{}>", rcpt))
                .await?
                .expect_positive("RCPT TO")?;
        }

        let reply = self.command("DATA").await?;
        if !reply.is_intermediate() {
            return Err(SmtpError::rejected(
                reply.code,
                format!("DATA rejected: {}", reply.text()),
            ));
        }

        let mut payload = dot_stuff(data);
        payload.extend_from_slice(b".\r\n");
        self.write_raw(&payload).await?;

        self.read_reply().await?.expect_positive("Message")?;
        Ok(())
    }

    /// Abort the current transaction so the session can be reused
    pub async fn reset(&mut self) -> SmtpResult<()> {
        self.command("RSET").await?.expect_positive("RSET")?;
        Ok(())
    }

    /// Say goodbye; errors are ignored since the session is being dropped
    pub async fn quit(mut self) {
        let _ = self.command("QUIT").await;
    }

    /// Send a command line and read its reply
    pub async fn command(&mut self, cmd: &str) -> SmtpResult<Reply> {
        if cmd.starts_with("AUTH") || !cmd.is_ascii() {
            debug!("C: <redacted>");
        } else {
            debug!("C: {}", cmd);
        }
        self.write_raw(format!("{}\r\n", cmd).as_bytes()).await?;
        self.read_reply().await
    }

    /// Send a line that must not be logged
    pub(crate) async fn secret(&mut self, line: &str) -> SmtpResult<Reply> {
        self.write_raw(format!("{}\r\n", line).as_bytes()).await?;
        self.read_reply().await
    }

    async fn write_raw(&mut self, data: &[u8]) -> SmtpResult<()> {
        let io_timeout = self.io_timeout;
        let stream = &mut self.stream;
        let io = async move {
            stream.write_all(data).await?;
            stream.flush().await
        };
        tokio::time::timeout(io_timeout, io)
            .await
            .map_err(|_| SmtpError::Timeout("writing to server".to_string()))??;
        Ok(())
    }

    async fn read_reply(&mut self) -> SmtpResult<Reply> {
        let mut raw = String::new();

        loop {
            let mut line = String::new();
            let n = tokio::time::timeout(self.io_timeout, self.stream.read_line(&mut line))
                .await
                .map_err(|_| SmtpError::Timeout("waiting for server reply".to_string()))??;

            if n == 0 {
                return Err(SmtpError::Protocol("Connection closed by server".to_string()));
            }
            debug!("S: {}", line.trim_end());
            raw.push_str(&line);

            // Final line has a space (or nothing) after the code
            if line.as_bytes().get(3) != Some(&b'-') {
                break;
            }
        }

        Reply::parse(&raw)
    }
}

/// Normalize line endings to CRLF and escape lines starting with '.'
fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 64);
    let body = data.strip_suffix(b"\n").unwrap_or(data);

    for line in body.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }

    out
}
