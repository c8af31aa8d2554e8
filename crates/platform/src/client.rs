use std::path::{Path, PathBuf};

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    Result,
    types::{Entity, EntityRef, MediaRef, PlatformMessage},
};

/// The one remote connection, as seen by the session core.
///
/// Implementations are expected to tolerate only one in-flight call at a
/// time; the session worker guarantees serialization, so adapters do not
/// need their own locking.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Establish the connection. Called exactly once, at session startup.
    async fn connect(&self) -> Result<()>;

    /// Whether the connection carries a prior (out-of-band) authorization.
    async fn is_authorized(&self) -> Result<bool>;

    /// Live connectivity probe for health reporting.
    async fn is_connected(&self) -> bool;

    /// Resolve a caller-supplied identifier to a concrete entity.
    async fn resolve_entity(&self, entity: &EntityRef) -> Result<Entity>;

    /// Fetch one page of history strictly older than `offset_id`
    /// (`offset_id == 0` starts at the most recent message), newest first,
    /// at most `limit` messages. An empty page means no more history.
    async fn history_page(
        &self,
        entity: &Entity,
        offset_id: i64,
        limit: usize,
    ) -> Result<Vec<PlatformMessage>>;

    /// Fetch a single message by id. `None` means the id does not exist for
    /// this entity, which is distinct from an operational failure.
    async fn message_by_id(&self, entity: &Entity, message_id: i64)
    -> Result<Option<PlatformMessage>>;

    /// Download an attachment to `target`. When `target` carries no file
    /// extension the platform appends its chosen one. Returns the final
    /// on-disk path, or `None` when the platform reports nothing to
    /// download.
    async fn download_media(&self, media: &MediaRef, target: &Path) -> Result<Option<PathBuf>>;

    /// Subscribe to new messages on `entity`. The receiver yields messages
    /// as the platform pushes them and closes when the connection drops.
    async fn subscribe(&self, entity: &Entity) -> Result<mpsc::Receiver<PlatformMessage>>;
}
