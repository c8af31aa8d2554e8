//! Message enrichment: platform record → JSON object, plus media download
//! info when the message carries an image-class attachment.

use std::sync::Arc;

use {
    serde_json::{Map, Value, json},
    tracing::warn,
};

use {
    relaygram_media::{MediaLinkSigner, MediaStore},
    relaygram_platform::{EntityRef, MediaKind, PlatformClient, PlatformMessage},
};

pub struct Enricher {
    pub(crate) client: Arc<dyn PlatformClient>,
    pub(crate) store: MediaStore,
    pub(crate) signer: MediaLinkSigner,
    pub(crate) media_base_url: Option<String>,
}

impl Enricher {
    /// Serialize `message` to a plain field mapping and attach
    /// `media.download_info` when an image-class attachment downloads
    /// successfully. Download failures are logged and leave the message
    /// unenriched; the fetch itself still succeeds.
    pub async fn serialize_message(
        &self,
        message: &PlatformMessage,
        source: &EntityRef,
    ) -> relaygram_platform::Result<Map<String, Value>> {
        let mut object = message.to_object()?;
        if let Some(info) = self.media_download_info(message, source).await {
            if let Some(media) = object
                .entry("media")
                .or_insert_with(|| json!({}))
                .as_object_mut()
            {
                media.insert("download_info".to_string(), info);
            }
        }
        Ok(object)
    }

    async fn media_download_info(
        &self,
        message: &PlatformMessage,
        source: &EntityRef,
    ) -> Option<Value> {
        let media = message.media.as_ref()?;
        if !media.kind.is_image() {
            return None;
        }

        if let Err(e) = tokio::fs::create_dir_all(self.store.root()).await {
            warn!(error = %e, "cannot create media directory, skipping download");
            return None;
        }

        let target = self.store.download_target(message.id);
        let local_path = match self.client.download_media(media, &target).await {
            Ok(Some(path)) => path,
            Ok(None) => return None,
            Err(e) => {
                warn!(message_id = message.id, error = %e, "unable to download media");
                return None;
            }
        };

        let relative_path = match self.store.relative_of(&local_path) {
            Ok(relative) => relative,
            Err(e) => {
                warn!(message_id = message.id, error = %e, "downloaded file escapes media root");
                return None;
            }
        };

        let mut info = Map::new();
        let kind = match media.kind {
            MediaKind::Photo => "photo",
            MediaKind::Document { .. } => "document",
        };
        info.insert("type".to_string(), json!(kind));
        info.insert(
            "local_path".to_string(),
            json!(local_path.display().to_string()),
        );
        info.insert("relative_path".to_string(), json!(relative_path));

        match self
            .signer
            .issue(&relative_path, Some(&source.to_string()), Some(message.id))
        {
            Ok(token) => {
                info.insert("signed_url".to_string(), json!(format!("/media/{token}")));
            }
            Err(e) => warn!(message_id = message.id, error = %e, "unable to sign media link"),
        }

        if let Some(base) = self.media_base_url.as_deref() {
            info.insert(
                "url".to_string(),
                json!(format!("{}/{relative_path}", base.trim_end_matches('/'))),
            );
        }

        Some(Value::Object(info))
    }
}
