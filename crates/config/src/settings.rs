use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

/// Environment variables that must be present for the process to start.
const REQUIRED_VARS: &[&str] = &[
    "TELEGRAM_API_ID",
    "TELEGRAM_API_HASH",
    "TELEGRAM_PHONE",
    "TELEGRAM_USERNAME",
    "API_KEY",
    "MEDIA_SIGNING_SECRET",
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One error naming every missing required variable, so the operator
    /// fixes the deployment in a single pass.
    #[error("missing required environment variables: {}", .names.join(", "))]
    MissingVars { names: Vec<String> },

    #[error("{name} is invalid: {message}")]
    InvalidValue { name: String, message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_value(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::InvalidValue {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// Immutable process settings.
#[derive(Clone)]
pub struct Settings {
    /// Platform application id.
    pub api_id: i64,
    /// Platform application hash.
    pub api_hash: Secret<String>,
    /// Phone number the session was authorized for.
    pub phone: String,
    /// Account username; also the default session file name.
    pub username: String,
    /// API key guarding the HTTP front door.
    pub api_key: Secret<String>,
    /// Secret for signing media link tokens.
    pub media_signing_secret: Secret<String>,

    /// On-disk session state file.
    pub session_path: PathBuf,
    /// Directory holding `last_response.json` and other runtime state.
    pub data_dir: PathBuf,
    /// Root of the downloaded-media tree.
    pub media_dir: PathBuf,
    /// Public base URL under which `media_dir` is exposed, if any.
    pub media_base_url: Option<String>,

    /// Webhook used when a request does not name one.
    pub default_webhook: Option<String>,
    /// Channel/group the listener subscribes to, if any.
    pub listener_entity: Option<String>,
    /// Webhook for listener-forwarded messages (falls back to `default_webhook`).
    pub listener_webhook: Option<String>,
    /// Raw base header spec for webhook posts (JSON object or `k: v` list).
    pub webhook_headers_raw: Option<String>,
    /// Raw header overrides applied on top for listener posts.
    pub listener_headers_raw: Option<String>,

    /// Maximum age of a signed media link.
    pub media_url_ttl: Duration,
    /// Serve expired media links with a warning instead of rejecting them.
    pub allow_expired_media: bool,

    /// HTTP bind host.
    pub bind_host: String,
    /// HTTP bind port.
    pub bind_port: u16,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_id", &self.api_id)
            .field("api_hash", &"[REDACTED]")
            .field("api_key", &"[REDACTED]")
            .field("media_signing_secret", &"[REDACTED]")
            .field("username", &self.username)
            .field("session_path", &self.session_path)
            .field("data_dir", &self.data_dir)
            .field("media_dir", &self.media_dir)
            .field("listener_entity", &self.listener_entity)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Load settings from the process environment, reading a `.env` file
    /// first if one is present.
    pub fn from_env() -> Result<Self, Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup. Tests use this to
    /// avoid touching process-global environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let missing: Vec<String> = REQUIRED_VARS
            .iter()
            .filter(|name| get(name).is_none())
            .map(|name| (*name).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingVars { names: missing });
        }

        // All required vars are present past this point.
        let require = |name: &str| {
            get(name).ok_or_else(|| Error::invalid_value(name, "required variable vanished"))
        };

        let api_id_raw = require("TELEGRAM_API_ID")?;
        let api_id = api_id_raw
            .parse::<i64>()
            .map_err(|_| Error::invalid_value("TELEGRAM_API_ID", "must be an integer"))?;

        let username = require("TELEGRAM_USERNAME")?;

        let session_dir = get("TELEGRAM_SESSION_DIR").unwrap_or_else(|| "data".to_string());
        let session_file = get("TELEGRAM_SESSION_FILE").unwrap_or_else(|| username.clone());
        let session_path = if Path::new(&session_file).is_absolute() {
            PathBuf::from(session_file)
        } else {
            Path::new(&session_dir).join(session_file)
        };

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| session_dir.clone()));
        let media_dir = get("TELEGRAM_MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("media"));

        let media_url_ttl = match get("MEDIA_URL_TTL") {
            Some(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|_| Error::invalid_value("MEDIA_URL_TTL", "must be seconds"))?,
            ),
            None => Duration::from_secs(3600),
        };

        let allow_expired_media = match get("ALLOW_EXPIRED_MEDIA") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| Error::invalid_value("ALLOW_EXPIRED_MEDIA", "must be a boolean"))?,
            None => false,
        };

        let bind_port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| Error::invalid_value("PORT", "must be a port number"))?,
            None => 5000,
        };

        let settings = Self {
            api_id,
            api_hash: Secret::new(require("TELEGRAM_API_HASH")?),
            phone: require("TELEGRAM_PHONE")?,
            api_key: Secret::new(require("API_KEY")?),
            media_signing_secret: Secret::new(require("MEDIA_SIGNING_SECRET")?),
            username,
            session_path,
            data_dir,
            media_dir,
            media_base_url: get("MEDIA_BASE_URL"),
            default_webhook: get("N8N_WEBHOOK_URL"),
            listener_entity: get("TELEGRAM_LISTENER_ENTITY"),
            listener_webhook: get("LISTENER_WEBHOOK_URL"),
            webhook_headers_raw: get("WEBHOOK_HEADERS"),
            listener_headers_raw: get("LISTENER_WEBHOOK_HEADERS"),
            media_url_ttl,
            allow_expired_media,
            bind_host: get("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            bind_port,
        };
        debug!(?settings, "loaded settings");
        Ok(settings)
    }

    /// The webhook a listener subscription would deliver to, if any.
    #[must_use]
    pub fn effective_listener_webhook(&self) -> Option<&str> {
        self.listener_webhook
            .as_deref()
            .or(self.default_webhook.as_deref())
    }

    /// Constant-time-ish API key comparison is not required here; the key is
    /// a deployment credential, not a per-user secret.
    #[must_use]
    pub fn api_key_matches(&self, candidate: &str) -> bool {
        self.api_key.expose_secret() == candidate
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
