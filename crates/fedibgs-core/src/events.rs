//! Inbound timeline event shapes.
//!
//! `RawStatus` mirrors the subset of a Mastodon-compatible status object the
//! listener reads. Every field is optional or defaulted so that presence
//! checks happen in the filter chain rather than in the decoder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One status delivered by the public timeline stream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStatus {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reblog: Option<Value>,
    #[serde(default)]
    pub in_reply_to_id: Option<Value>,
    #[serde(default)]
    pub media_attachments: Vec<RawAttachment>,
    #[serde(default)]
    pub tags: Vec<RawTag>,
    #[serde(default)]
    pub account: Option<RawAccount>,
    #[serde(default)]
    pub url: Option<String>,
}

impl RawStatus {
    /// A boost carries the boosted status in `reblog`.
    pub fn is_boost(&self) -> bool {
        self.reblog.as_ref().is_some_and(|v| !is_falsy(v))
    }

    /// A reply names its parent in `in_reply_to_id`.
    pub fn is_reply(&self) -> bool {
        self.in_reply_to_id.as_ref().is_some_and(|v| !is_falsy(v))
    }
}

/// Media attached to a status.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAttachment {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RawAttachment {
    pub fn is_image(&self) -> bool {
        self.kind == "image"
    }

    /// The URL to probe: the origin server's copy when known, else the
    /// instance-local copy.
    pub fn preferred_url(&self) -> Option<&str> {
        self.remote_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.url.as_deref().filter(|u| !u.is_empty()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTag {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAccount {
    pub url: String,
    pub username: String,
}

/// One decoded unit of the inbound stream.
///
/// The listener's read loop matches on this exhaustively; `Abort` and
/// `Error` end the loop with a fatal stream error.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A new status, still JSON-encoded.
    Update(String),
    /// The upstream closed the connection.
    Abort(String),
    /// The transport failed or the upstream refused the connection.
    Error(String),
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal_status() {
        let status: RawStatus = serde_json::from_str(
            r#"{"url":"https://x/1","content":"hello","media_attachments":[],
                "in_reply_to_id":null,"reblog":null}"#,
        )
        .unwrap();
        assert!(status.id.is_none());
        assert_eq!(status.content.as_deref(), Some("hello"));
        assert!(!status.is_boost());
        assert!(!status.is_reply());
    }

    #[test]
    fn test_boost_and_reply_detection() {
        let status: RawStatus = serde_json::from_str(
            r#"{"id":"1","content":"","reblog":{"id":"2"},"in_reply_to_id":"99"}"#,
        )
        .unwrap();
        assert!(status.is_boost());
        assert!(status.is_reply());
    }

    #[test]
    fn test_attachment_prefers_remote_url() {
        let att = RawAttachment {
            kind: "image".into(),
            url: Some("https://local/a.png".into()),
            remote_url: Some("https://origin/a.png".into()),
            description: None,
        };
        assert_eq!(att.preferred_url(), Some("https://origin/a.png"));

        let local_only = RawAttachment {
            remote_url: Some(String::new()),
            ..att
        };
        assert_eq!(local_only.preferred_url(), Some("https://local/a.png"));
    }
}
