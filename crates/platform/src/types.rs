//! Domain types mapped from the remote platform.
//!
//! Pure data; no wire or transport types cross this boundary.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Caller-supplied identifier of a channel or group: numeric id or symbolic
/// name (with or without a leading `@`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Id(i64),
    Name(String),
}

impl EntityRef {
    /// Parse a raw identifier. All-digit strings (optionally signed) are
    /// treated as numeric ids, everything else as a symbolic name.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Self::Id(id);
        }
        Self::Name(trimmed.to_string())
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for EntityRef {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// A resolved channel/group on the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl Entity {
    /// Best available display name for logging.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Classification of an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MediaKind {
    Photo,
    Document { mime: String },
}

impl MediaKind {
    /// Whether the attachment is image-class: a photo, or a document with an
    /// `image/*` MIME type. Only image-class media is downloaded.
    #[must_use]
    pub fn is_image(&self) -> bool {
        match self {
            Self::Photo => true,
            Self::Document { mime } => mime.starts_with("image/"),
        }
    }
}

/// Reference to a downloadable attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(flatten)]
    pub kind: MediaKind,
    /// Opaque handle the client resolves when downloading.
    pub file_ref: String,
    /// Platform-chosen file extension (without the dot), if known.
    pub extension: Option<String>,
}

/// A message record converted to plain fields. Never mutated by the platform
/// after capture; this system only adds enrichment on top of the serialized
/// form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMessage {
    pub id: i64,
    pub sender: Option<String>,
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

impl PlatformMessage {
    /// Serialize into a JSON object for enrichment and webhook payloads.
    pub fn to_object(&self) -> crate::Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(crate::Error::invalid_input(format!(
                "message serialized to non-object JSON: {other}"
            ))),
        }
    }
}
