use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    secrecy::ExposeSecret,
    serde::Serialize,
    serde_json::Value,
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

use {
    relaygram_config::Settings,
    relaygram_media::{ExpiryPolicy, MediaLinkSigner, MediaStore},
    relaygram_platform::{EntityRef, PlatformClient, PlatformMessage},
    relaygram_webhook::{HeaderBuilder, WebhookDispatcher},
};

use crate::{Error, Result, enrich::Enricher};

/// Largest page requested from the platform while paginating history.
const PAGE_SIZE: usize = 100;

/// Bound on the lazy re-download triggered by a signed-link resolution, so a
/// stalled remote download cannot hang an HTTP media request indefinitely.
const REDOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Operational health of the session, for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub session_connected: bool,
    pub issues: Vec<String>,
}

enum Command {
    FetchHistory {
        entity: EntityRef,
        limit: usize,
        webhook_url: Option<String>,
        reply: oneshot::Sender<Result<Vec<Value>>>,
    },
    FetchById {
        entity: EntityRef,
        message_id: i64,
        webhook_url: Option<String>,
        reply: oneshot::Sender<Result<Option<Value>>>,
    },
    Redownload {
        entity: EntityRef,
        message_id: i64,
        target: PathBuf,
        reply: oneshot::Sender<Result<Option<PathBuf>>>,
    },
    /// A listener event; enriched and dispatched under the same gate as
    /// caller-driven commands.
    Forward { message: PlatformMessage },
}

/// Owns the single authenticated platform connection.
///
/// Cloneable; all clones talk to the one background worker. Commands execute
/// one at a time on that worker: the single-consumer command loop is the
/// mutual-exclusion gate, held across the full remote sequence of each
/// operation (resolve, fetch, media download).
#[derive(Clone)]
pub struct SessionManager {
    tx: mpsc::UnboundedSender<Command>,
    client: Arc<dyn PlatformClient>,
    settings: Arc<Settings>,
    signer: MediaLinkSigner,
    store: MediaStore,
    issues: Arc<Vec<String>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Connect, verify prior authorization, spawn the background worker, and
    /// establish the listener subscription if one is configured.
    ///
    /// Fails fast (non-recoverable) on missing directories, connection
    /// failure, or absent authorization; authorization is established
    /// out-of-band before the manager starts.
    pub async fn start(
        settings: Arc<Settings>,
        client: Arc<dyn PlatformClient>,
        dispatcher: WebhookDispatcher,
    ) -> Result<Self> {
        ensure_directories(&settings)?;

        client.connect().await?;
        if !client.is_authorized().await? {
            return Err(Error::fatal(
                "platform session is not authorized; complete the login out-of-band \
                 before starting the service",
            ));
        }
        info!("platform client connected and authorized");

        let policy = if settings.allow_expired_media {
            ExpiryPolicy::ServeExpired
        } else {
            ExpiryPolicy::Strict
        };
        let signer =
            MediaLinkSigner::new(settings.media_signing_secret.expose_secret().as_bytes(), policy)
                .map_err(|e| Error::fatal(format!("media signing secret rejected: {e}")))?;
        let store = MediaStore::new(settings.media_dir.clone());

        let header_builder = HeaderBuilder::new(settings.webhook_headers_raw.clone());
        let base_headers = header_builder.build(None);
        let listener_headers = header_builder.build(settings.listener_headers_raw.as_deref());

        let mut issues = Vec::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = Worker {
            client: Arc::clone(&client),
            dispatcher,
            enricher: Enricher {
                client: Arc::clone(&client),
                store: store.clone(),
                signer: signer.clone(),
                media_base_url: settings.media_base_url.clone(),
            },
            default_webhook: settings.default_webhook.clone(),
            base_headers,
            listener_entity: settings.listener_entity.as_deref().map(EntityRef::parse),
            listener_webhook: settings.effective_listener_webhook().map(str::to_string),
            listener_headers,
        };

        // The subscription decision is made once, here, not per message.
        if let Some(entity_ref) = worker.listener_entity.clone() {
            if worker.listener_webhook.is_some() {
                match start_listener(&client, &entity_ref).await {
                    Ok(events) => {
                        spawn_forwarder(events, tx.clone(), cancel.clone());
                    }
                    Err(e) => {
                        error!(entity = %entity_ref, error = %e, "failed to start listener");
                        issues.push(format!("listener failed to start: {e}"));
                    }
                }
            } else {
                warn!("listener entity configured but no webhook resolves, forwarding disabled");
                issues.push(
                    "listener entity configured but no listener or default webhook is set"
                        .to_string(),
                );
            }
        }

        tokio::spawn(worker.run(rx, cancel.clone()));

        Ok(Self {
            tx,
            client,
            settings,
            signer,
            store,
            issues: Arc::new(issues),
            cancel,
        })
    }

    /// Fetch up to `limit` messages, newest first, enriching each and
    /// dispatching it to the effective webhook (argument, else the configured
    /// default) in return order. `limit <= 0` yields an empty sequence
    /// without any remote call.
    pub async fn fetch_history(
        &self,
        entity: &str,
        limit: i64,
        webhook_url: Option<String>,
    ) -> Result<Vec<Value>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let (reply, rx) = oneshot::channel();
        self.submit(Command::FetchHistory {
            entity: EntityRef::parse(entity),
            limit: limit as usize,
            webhook_url,
            reply,
        })?;
        rx.await.map_err(|_| worker_gone())?
    }

    /// Fetch a single message by id. `Ok(None)` means the id does not exist
    /// for the entity; operational failures are `Err`.
    pub async fn fetch_by_id(
        &self,
        entity: &str,
        message_id: i64,
        webhook_url: Option<String>,
    ) -> Result<Option<Value>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::FetchById {
            entity: EntityRef::parse(entity),
            message_id,
            webhook_url,
            reply,
        })?;
        rx.await.map_err(|_| worker_gone())?
    }

    /// Verify a signed media token and return the absolute file path.
    ///
    /// If the file is missing and enough context exists (token-embedded,
    /// else overrides), one re-download is attempted through the worker,
    /// bounded by a timeout. The path is returned even when the re-download
    /// fails; the serving layer treats a missing file as not-found.
    pub async fn resolve_media_path(
        &self,
        token: &str,
        entity_override: Option<&str>,
        message_id_override: Option<i64>,
    ) -> Result<PathBuf> {
        let claims = self.signer.verify(token, self.settings.media_url_ttl)?;
        let absolute = self.store.resolve(&claims.path)?;

        if !tokio::fs::try_exists(&absolute).await.unwrap_or(false) {
            let entity = claims
                .entity
                .as_deref()
                .or(entity_override)
                .map(EntityRef::parse);
            let message_id = claims.message_id.or(message_id_override);
            if let (Some(entity), Some(message_id)) = (entity, message_id) {
                self.redownload(entity, message_id, absolute.clone()).await;
            }
        }

        Ok(absolute)
    }

    /// Best-effort-once re-download of a missing media file.
    async fn redownload(&self, entity: EntityRef, message_id: i64, target: PathBuf) {
        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, "cannot create media subdirectory for re-download");
                return;
            }
        }

        let (reply, rx) = oneshot::channel();
        let submitted = self.submit(Command::Redownload {
            entity: entity.clone(),
            message_id,
            target,
            reply,
        });
        if submitted.is_err() {
            warn!(%entity, message_id, "session worker unavailable for media re-download");
            return;
        }

        match tokio::time::timeout(REDOWNLOAD_TIMEOUT, rx).await {
            Ok(Ok(Ok(Some(_)))) => {}
            Ok(Ok(Ok(None))) => {
                warn!(%entity, message_id, "message no longer carries downloadable media");
            }
            Ok(Ok(Err(e))) => {
                warn!(%entity, message_id, error = %e, "failed to re-download missing media");
            }
            Ok(Err(_)) => {
                warn!(%entity, message_id, "session worker dropped the re-download");
            }
            Err(_) => {
                warn!(%entity, message_id, "media re-download timed out");
            }
        }
    }

    /// Operational health. Connectivity comes from the client's local probe,
    /// so a busy gate does not block monitoring.
    pub async fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            session_connected: self.client.is_connected().await,
            issues: self.issues.as_ref().clone(),
        }
    }

    /// Stop the worker and the listener forwarder.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| worker_gone())
    }
}

fn worker_gone() -> Error {
    Error::fatal("session worker is not running")
}

/// The session and media directories are deployment state mounted before the
/// process starts, so a missing session directory is a configuration error,
/// not something to silently create.
fn ensure_directories(settings: &Settings) -> Result<()> {
    let session_dir = settings
        .session_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    if !session_dir.is_dir() {
        return Err(Error::fatal(format!(
            "session directory does not exist: {} (mount the persistent volume holding the \
             authorized session file)",
            session_dir.display()
        )));
    }

    for (label, dir) in [("data", &settings.data_dir), ("media", &settings.media_dir)] {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::fatal(format!(
                "{label} directory {} is not usable: {e}",
                dir.display()
            ))
        })?;
        let readonly = std::fs::metadata(dir)
            .map(|m| m.permissions().readonly())
            .unwrap_or(true);
        if readonly {
            return Err(Error::fatal(format!(
                "{label} directory is not writable: {}",
                dir.display()
            )));
        }
    }
    Ok(())
}

async fn start_listener(
    client: &Arc<dyn PlatformClient>,
    entity_ref: &EntityRef,
) -> relaygram_platform::Result<mpsc::Receiver<PlatformMessage>> {
    let entity = client.resolve_entity(entity_ref).await?;
    let events = client.subscribe(&entity).await?;
    info!(entity = %entity.display_name(), "listening for new messages");
    Ok(events)
}

/// Feed listener events into the command queue so push-driven work is
/// serialized with caller-driven work.
fn spawn_forwarder(
    mut events: mpsc::Receiver<PlatformMessage>,
    tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(message) = event else {
                        warn!("listener subscription closed");
                        break;
                    };
                    if tx.send(Command::Forward { message }).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

struct Worker {
    client: Arc<dyn PlatformClient>,
    dispatcher: WebhookDispatcher,
    enricher: Enricher,
    default_webhook: Option<String>,
    base_headers: std::collections::HashMap<String, String>,
    listener_entity: Option<EntityRef>,
    listener_webhook: Option<String>,
    listener_headers: std::collections::HashMap<String, String>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("session worker stopping");
                    break;
                }
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command).await;
                }
            }
        }
    }

    async fn handle(&self, command: Command) {
        match command {
            Command::FetchHistory {
                entity,
                limit,
                webhook_url,
                reply,
            } => {
                reply
                    .send(self.fetch_history(&entity, limit, webhook_url).await)
                    .ok();
            }
            Command::FetchById {
                entity,
                message_id,
                webhook_url,
                reply,
            } => {
                reply
                    .send(self.fetch_by_id(&entity, message_id, webhook_url).await)
                    .ok();
            }
            Command::Redownload {
                entity,
                message_id,
                target,
                reply,
            } => {
                reply
                    .send(self.redownload(&entity, message_id, &target).await)
                    .ok();
            }
            Command::Forward { message } => self.forward(message).await,
        }
    }

    /// Paginate backward from the most recent message, dispatching each
    /// enriched message before pagination continues.
    async fn fetch_history(
        &self,
        entity_ref: &EntityRef,
        limit: usize,
        webhook_url: Option<String>,
    ) -> Result<Vec<Value>> {
        let effective_webhook = webhook_url.or_else(|| self.default_webhook.clone());
        let entity = self.client.resolve_entity(entity_ref).await?;

        let mut collected = Vec::new();
        let mut offset_id = 0i64;
        while collected.len() < limit {
            let page_limit = PAGE_SIZE.min(limit - collected.len());
            let page = self
                .client
                .history_page(&entity, offset_id, page_limit)
                .await?;
            let Some(last) = page.last() else { break };
            offset_id = last.id;

            for message in &page {
                let value = self.enrich(message, entity_ref).await?;
                if let Some(url) = effective_webhook.as_deref() {
                    self.dispatcher.send(url, value.clone(), &self.base_headers);
                }
                collected.push(value);
                if collected.len() >= limit {
                    break;
                }
            }
        }
        Ok(collected)
    }

    async fn fetch_by_id(
        &self,
        entity_ref: &EntityRef,
        message_id: i64,
        webhook_url: Option<String>,
    ) -> Result<Option<Value>> {
        let effective_webhook = webhook_url.or_else(|| self.default_webhook.clone());
        let entity = self.client.resolve_entity(entity_ref).await?;
        let Some(message) = self.client.message_by_id(&entity, message_id).await? else {
            return Ok(None);
        };

        let value = self.enrich(&message, entity_ref).await?;
        if let Some(url) = effective_webhook.as_deref() {
            self.dispatcher.send(url, value.clone(), &self.base_headers);
        }
        Ok(Some(value))
    }

    async fn redownload(
        &self,
        entity_ref: &EntityRef,
        message_id: i64,
        target: &std::path::Path,
    ) -> Result<Option<PathBuf>> {
        let entity = self.client.resolve_entity(entity_ref).await?;
        let Some(message) = self.client.message_by_id(&entity, message_id).await? else {
            return Ok(None);
        };
        let Some(media) = message.media.as_ref() else {
            return Ok(None);
        };
        Ok(self.client.download_media(media, target).await?)
    }

    /// Listener path: no caller to report to, so failures are logged.
    async fn forward(&self, message: PlatformMessage) {
        let (Some(url), Some(entity_ref)) =
            (self.listener_webhook.as_deref(), self.listener_entity.as_ref())
        else {
            return;
        };
        match self.enrich(&message, entity_ref).await {
            Ok(value) => self.dispatcher.send(url, value, &self.listener_headers),
            Err(e) => error!(message_id = message.id, error = %e, "failed to forward message"),
        }
    }

    async fn enrich(&self, message: &PlatformMessage, entity_ref: &EntityRef) -> Result<Value> {
        let mut object = self.enricher.serialize_message(message, entity_ref).await?;
        object.insert(
            "source_entity".to_string(),
            Value::String(entity_ref.to_string()),
        );
        Ok(Value::Object(object))
    }
}
