//! Per-collection synchronization state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the engines need to remember about one calendar between
/// syncs. The caller persists it via
/// [`crate::sync::traits::SyncResultHandler::save_sync_state`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub calendar_url: String,
    /// Last-seen collection ctag; unchanged ctag short-circuits the pull.
    pub ctag: Option<String>,
    /// Opaque RFC 6578 continuation. iCloud's happens to be a URL; it is
    /// never interpreted.
    pub sync_token: Option<String>,
    /// href → etag of every resource seen in the last listing.
    pub etags: HashMap<String, String>,
    /// import_id → href. Several import ids may share an href when a
    /// resource holds a master plus overrides.
    pub url_map: HashMap<String, String>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new(calendar_url: impl Into<String>) -> Self {
        Self {
            calendar_url: calendar_url.into(),
            ..Self::default()
        }
    }

    /// All import ids currently mapped to `href`. Several rows share one
    /// href when the resource holds a master plus overrides.
    pub fn import_ids_for_href(&self, href: &str) -> Vec<String> {
        self.url_map
            .iter()
            .filter(|(_, h)| h.as_str() == href)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
