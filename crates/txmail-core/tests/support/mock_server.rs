//! Loopback SMTP server for delivery tests
//!
//! Speaks enough SMTP for the client: EHLO/HELO, AUTH PLAIN/LOGIN/CRAM-MD5,
//! MAIL, RCPT, DATA, RSET and QUIT. Every accepted message is recorded.
#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A message accepted by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub from: String,
    pub recipients: Vec<String>,
    pub data: String,
}

#[derive(Clone)]
struct MockConfig {
    capabilities: Vec<String>,
    credentials: Option<(String, String)>,
    rcpt_response: (u16, String),
    data_delay: Option<Duration>,
    close_after_message: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            capabilities: vec!["AUTH PLAIN LOGIN CRAM-MD5".to_string(), "SIZE 10000000".to_string()],
            credentials: None,
            rcpt_response: (250, "OK".to_string()),
            data_delay: None,
            close_after_message: false,
        }
    }
}

#[derive(Default)]
struct MockState {
    commands: Mutex<Vec<String>>,
    messages: Mutex<Vec<ReceivedMessage>>,
    connections: AtomicUsize,
}

/// Mock SMTP server bound to 127.0.0.1 on a random port
pub struct MockSmtpServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    accept_loop: JoinHandle<()>,
}

impl MockSmtpServer {
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockConfig::default(),
        }
    }

    pub async fn start() -> Self {
        Self::builder().build().await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Commands received, in order, across all sessions
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<ReceivedMessage> {
        self.state.messages.lock().unwrap().clone()
    }

    /// Number of TCP connections accepted
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

pub struct MockSmtpServerBuilder {
    config: MockConfig,
}

impl MockSmtpServerBuilder {
    /// Require AUTH with these credentials
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.config.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    pub fn with_rcpt_response(mut self, code: u16, message: &str) -> Self {
        self.config.rcpt_response = (code, message.to_string());
        self
    }

    /// Hold the final DATA reply for `delay`
    pub fn with_data_delay(mut self, delay: Duration) -> Self {
        self.config.data_delay = Some(delay);
        self
    }

    /// Drop the connection right after each accepted message
    pub fn close_after_message(mut self) -> Self {
        self.config.close_after_message = true;
        self
    }

    pub async fn build(self) -> MockSmtpServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());
        let config = Arc::new(self.config);

        let loop_state = state.clone();
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                loop_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = loop_state.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let _ = handle_client(stream, config, state).await;
                });
            }
        });

        MockSmtpServer {
            addr,
            state,
            accept_loop,
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    config: Arc<MockConfig>,
    state: Arc<MockState>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let mut authenticated = config.credentials.is_none();
    let mut from = String::new();
    let mut recipients: Vec<String> = Vec::new();

    writer.write_all(b"220 mock.local ESMTP ready\r\n").await?;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let cmd = line.trim_end().to_string();
        state.commands.lock().unwrap().push(cmd.clone());

        let (verb, arg) = match cmd.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.to_string()),
            None => (cmd.to_ascii_uppercase(), String::new()),
        };

        let reply = match verb.as_str() {
            "EHLO" => {
                let mut reply = String::from("250-mock.local\r\n");
                let last = config.capabilities.len().saturating_sub(1);
                for (i, cap) in config.capabilities.iter().enumerate() {
                    let sep = if i == last { ' ' } else { '-' };
                    reply.push_str(&format!("250{}{}\r\n", sep, cap));
                }
                if config.capabilities.is_empty() {
                    reply = "250 mock.local\r\n".to_string();
                }
                reply
            }
            "HELO" => "250 mock.local\r\n".to_string(),
            "AUTH" => {
                let ok = authenticate(&arg, &config, &mut reader, &mut writer, &state).await?;
                authenticated = ok;
                if ok {
                    "235 Authentication succeeded\r\n".to_string()
                } else {
                    "535 Authentication failed\r\n".to_string()
                }
            }
            "MAIL" if !authenticated => "530 Authentication required\r\n".to_string(),
            "MAIL" => {
                from = strip_path(&arg, "FROM:");
                recipients.clear();
                "250 OK\r\n".to_string()
            }
            "RCPT" => {
                let (code, message) = &config.rcpt_response;
                if *code == 250 {
                    recipients.push(strip_path(&arg, "TO:"));
                }
                format!("{} {}\r\n", code, message)
            }
            "DATA" if recipients.is_empty() => "503 No valid recipients\r\n".to_string(),
            "DATA" => {
                writer.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await?;
                let data = read_data(&mut reader).await?;
                if let Some(delay) = config.data_delay {
                    tokio::time::sleep(delay).await;
                }
                state.messages.lock().unwrap().push(ReceivedMessage {
                    from: std::mem::take(&mut from),
                    recipients: std::mem::take(&mut recipients),
                    data,
                });
                writer.write_all(b"250 OK: queued\r\n").await?;
                if config.close_after_message {
                    return Ok(());
                }
                continue;
            }
            "RSET" => {
                from.clear();
                recipients.clear();
                "250 OK\r\n".to_string()
            }
            "NOOP" => "250 OK\r\n".to_string(),
            "QUIT" => {
                writer.write_all(b"221 Bye\r\n").await?;
                return Ok(());
            }
            _ => "500 Unknown command\r\n".to_string(),
        };

        writer.write_all(reply.as_bytes()).await?;
    }
}

async fn authenticate(
    arg: &str,
    config: &MockConfig,
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    state: &MockState,
) -> std::io::Result<bool> {
    let Some((user, pass)) = config.credentials.clone() else {
        return Ok(true);
    };
    let (mechanism, initial) = match arg.split_once(' ') {
        Some((m, rest)) => (m.to_ascii_uppercase(), Some(rest.to_string())),
        None => (arg.to_ascii_uppercase(), None),
    };

    let decode = |s: &str| {
        BASE64
            .decode(s.trim().as_bytes())
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .unwrap_or_default()
    };

    let ok = match mechanism.as_str() {
        "PLAIN" => {
            let payload = decode(&initial.unwrap_or_default());
            payload == format!("\0{}\0{}", user, pass)
        }
        "LOGIN" => {
            writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
            let username = decode(&read_line(reader).await?);
            writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
            let password = decode(&read_line(reader).await?);
            username == user && password == pass
        }
        "CRAM-MD5" => {
            let challenge = "<1896.697170952@mock.local>";
            writer
                .write_all(format!("334 {}\r\n", BASE64.encode(challenge)).as_bytes())
                .await?;
            let response = read_line(reader).await?;
            response.trim() == txmail_core::smtp::cram_md5_response(&user, &pass, challenge.as_bytes())
        }
        _ => false,
    };

    state
        .commands
        .lock()
        .unwrap()
        .push(format!("AUTH-RESULT {} {}", mechanism, ok));
    Ok(ok)
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line.trim_end().to_string())
}

async fn read_data(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> std::io::Result<String> {
    let mut data = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        if line == ".\r\n" {
            break;
        }
        let unstuffed = line.strip_prefix('.').unwrap_or(&line);
        data.push_str(unstuffed);
    }
    Ok(data)
}

fn strip_path(arg: &str, prefix: &str) -> String {
    let arg = arg.trim();
    let rest = if arg.len() >= prefix.len() && arg[..prefix.len()].eq_ignore_ascii_case(prefix) {
        &arg[prefix.len()..]
    } else {
        arg
    };
    rest.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}
