//! SMTP replies and EHLO capabilities

use super::error::{SmtpError, SmtpResult};
use std::collections::HashSet;

/// A complete, possibly multi-line, server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// Parse the raw reply text (one or more `NNN-text`/`NNN text` lines)
    pub fn parse(raw: &str) -> SmtpResult<Self> {
        let mut code = None;
        let mut lines = Vec::new();

        for line in raw.lines() {
            let line = line.trim_end_matches('\r');
            if line.len() < 3 {
                return Err(SmtpError::Protocol(format!("Malformed reply line: {:?}", line)));
            }
            let line_code: u16 = line
                .get(..3)
                .unwrap_or_default()
                .parse()
                .map_err(|_| SmtpError::Protocol(format!("Malformed reply code: {:?}", line)))?;
            if *code.get_or_insert(line_code) != line_code {
                return Err(SmtpError::Protocol(format!(
                    "Inconsistent reply codes in multi-line reply: {:?}",
                    raw
                )));
            }
            lines.push(line.get(4..).unwrap_or_default().to_string());
        }

        let code = code.ok_or_else(|| SmtpError::Protocol("Empty reply".to_string()))?;
        Ok(Self { code, lines })
    }

    /// 2xx
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// 4xx or 5xx
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// Convert a non-positive reply into an error
    pub(crate) fn expect_positive(self, what: &str) -> SmtpResult<Self> {
        if self.is_positive() {
            Ok(self)
        } else {
            Err(SmtpError::rejected(
                self.code,
                format!("{} rejected: {}", what, self.text()),
            ))
        }
    }
}

/// Extensions advertised in an EHLO reply
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub server_name: String,
    extensions: HashSet<String>,
    auth_mechanisms: HashSet<String>,
}

impl Capabilities {
    pub fn parse(reply: &Reply) -> Self {
        let mut caps = Capabilities {
            server_name: reply.lines.first().cloned().unwrap_or_default(),
            ..Default::default()
        };

        for line in reply.lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            let keyword = keyword.to_ascii_uppercase();
            if keyword == "AUTH" || keyword.starts_with("AUTH=") {
                caps.auth_mechanisms.extend(
                    keyword
                        .strip_prefix("AUTH=")
                        .into_iter()
                        .map(str::to_string)
                        .chain(words.map(|w| w.to_ascii_uppercase())),
                );
                caps.extensions.insert("AUTH".to_string());
            } else {
                caps.extensions.insert(keyword);
            }
        }

        caps
    }

    /// Capabilities of a server that only answered HELO
    pub fn without_extensions(reply: &Reply) -> Self {
        Capabilities {
            server_name: reply.lines.first().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.contains(&extension.to_ascii_uppercase())
    }

    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.auth_mechanisms
            .contains(&mechanism.to_ascii_uppercase())
    }
}
