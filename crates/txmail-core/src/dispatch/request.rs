//! Transactional send request

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use txmail_common::types::{SubscriberId, TemplateId};
use txmail_common::{Attachment, ContentType, Error, Headers, Result};

/// Body of a transactional send request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxRequest {
    #[serde(default)]
    pub subscriber_id: SubscriberId,

    #[serde(default)]
    pub subscriber_email: String,

    pub template_id: TemplateId,

    #[serde(default)]
    pub from_email: String,

    #[serde(default)]
    pub messenger: String,

    /// Overrides the rendered template subject when non-empty
    #[serde(default)]
    pub subject: String,

    /// Exposed to the template as `tx.body`
    #[serde(default)]
    pub body: String,

    /// Arbitrary data exposed to the template as `tx.data`
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub content_type: Option<ContentType>,

    /// List of header maps, merged in order
    #[serde(default)]
    pub headers: Headers,

    #[serde(default)]
    pub attachments: Vec<TxAttachment>,
}

/// Attachment with base64-encoded content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxAttachment {
    pub name: String,

    /// Base64 content
    pub content: String,

    #[serde(default)]
    pub headers: Headers,
}

impl TxAttachment {
    pub fn decode(&self) -> Result<Attachment> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("attachment name is required".to_string()));
        }

        let content = BASE64.decode(self.content.trim().as_bytes()).map_err(|e| {
            Error::Validation(format!("invalid base64 in attachment {}: {}", self.name, e))
        })?;

        Ok(Attachment {
            name: self.name.clone(),
            headers: self.headers.clone(),
            content,
        })
    }
}

impl TxRequest {
    pub fn has_subscriber(&self) -> bool {
        self.subscriber_id != 0 || !self.subscriber_email.trim().is_empty()
    }

    pub fn decode_attachments(&self) -> Result<Vec<Attachment>> {
        self.attachments.iter().map(TxAttachment::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deserialize_minimal() {
        let req: TxRequest =
            serde_json::from_str(r#"{"subscriber_email": "a@b.com", "template_id": 3}"#).unwrap();

        assert_eq!(req.template_id, 3);
        assert_eq!(req.subscriber_id, 0);
        assert!(req.has_subscriber());
        assert!(req.content_type.is_none());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_deserialize_headers_and_attachments() {
        let req: TxRequest = serde_json::from_str(
            r#"{
                "subscriber_id": 9,
                "template_id": 1,
                "content_type": "plain",
                "headers": [{"X-A": "1"}, {"X-B": "2"}],
                "attachments": [{"name": "a.txt", "content": "aGVsbG8=", "headers": {"Content-Type": "text/plain"}}]
            }"#,
        )
        .unwrap();

        assert_eq!(req.content_type, Some(ContentType::Plain));
        assert_eq!(
            req.headers.iter().collect::<Vec<_>>(),
            vec![("X-A", "1"), ("X-B", "2")]
        );

        let attachments = req.decode_attachments().unwrap();
        assert_eq!(attachments[0].content, b"hello".to_vec());
        assert_eq!(attachments[0].content_type(), Some("text/plain"));
    }

    #[test]
    fn test_missing_subscriber() {
        let req = TxRequest {
            subscriber_email: "   ".to_string(),
            ..Default::default()
        };
        assert!(!req.has_subscriber());
    }

    #[test]
    fn test_bad_base64_is_validation_error() {
        let attachment = TxAttachment {
            name: "a.bin".to_string(),
            content: "***".to_string(),
            headers: Headers::new(),
        };
        assert!(matches!(attachment.decode(), Err(Error::Validation(_))));
    }
}
