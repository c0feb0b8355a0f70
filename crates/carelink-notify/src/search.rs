use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use carelink_types::actor::ActorKind;

/// Document shape pushed to the external text-search service. The index is
/// eventually consistent and never authoritative.
#[derive(Debug, Serialize)]
pub struct MessageDocument {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_name: String,
    pub sender_kind: ActorKind,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Best-effort client for the search service. Every call swallows its own
/// failure after logging it; the primary store has already committed by the
/// time these run.
#[derive(Clone)]
pub struct SearchIndex {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl SearchIndex {
    pub fn new(base_url: Option<String>) -> Self {
        if base_url.is_none() {
            debug!("Search indexing disabled (no base URL configured)");
        }
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub async fn upsert_message(&self, doc: &MessageDocument) {
        let Some(base) = &self.base_url else { return };
        let url = format!("{base}/messages/{}", doc.id);
        match self.client.put(&url).json(doc).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Search upsert for {} returned {}", doc.id, resp.status()),
            Err(e) => warn!("Search upsert for {} failed: {}", doc.id, e),
        }
    }

    /// Flip the read flag on already-indexed messages.
    pub async fn mark_read(&self, ids: &[Uuid]) {
        let Some(base) = &self.base_url else { return };
        if ids.is_empty() {
            return;
        }
        let url = format!("{base}/messages/read");
        let payload = serde_json::json!({ "ids": ids });
        match self.client.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Search read-flag update returned {}", resp.status()),
            Err(e) => warn!("Search read-flag update failed: {}", e),
        }
    }
}
