//! Live relay state: settings, processed-update ledger and channel registry.
//!
//! The remote document carries all three; [`AppState`] is the in-memory view
//! the dispatcher owns and persists at its checkpoints.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{config::Settings, domain::ChatId};

/// Bounded FIFO record of processed update ids. Never holds duplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateLedger {
    ids: VecDeque<i64>,
    max_len: usize,
}

impl UpdateLedger {
    pub fn new(ids: impl IntoIterator<Item = i64>, max_len: usize) -> Self {
        let mut ledger = Self {
            ids: VecDeque::new(),
            max_len: max_len.max(1),
        };
        for id in ids {
            ledger.record(id);
        }
        ledger
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    /// Append `id`, dropping the oldest entries beyond the bound.
    ///
    /// Returns `false` (and leaves the ledger untouched) for a duplicate.
    pub fn record(&mut self, id: i64) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push_back(id);
        while self.ids.len() > self.max_len {
            self.ids.pop_front();
        }
        true
    }

    /// Offset for the next poll: one past the most recent id, or 0 when empty.
    pub fn next_offset(&self) -> i64 {
        self.ids.back().map(|id| id + 1).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.ids.iter().copied().collect()
    }
}

/// Chats known to be channels, sorted ascending without duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelRegistry {
    ids: Vec<i64>,
}

impl ChannelRegistry {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// Returns `true` when the chat was not known before.
    pub fn insert(&mut self, chat_id: ChatId) -> bool {
        match self.ids.binary_search(&chat_id.0) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, chat_id.0);
                true
            }
        }
    }

    pub fn remove(&mut self, chat_id: ChatId) -> bool {
        match self.ids.binary_search(&chat_id.0) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, chat_id: ChatId) -> bool {
        self.ids.binary_search(&chat_id.0).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChatId> + '_ {
        self.ids.iter().map(|id| ChatId(*id))
    }
}

/// The remote document as stored. Unknown keys survive a read/write cycle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(flatten)]
    pub settings: Settings,

    #[serde(rename = "TgUpdateLog", default)]
    pub update_log: Vec<i64>,

    #[serde(rename = "TgAllChannelsChatIds", default)]
    pub channel_ids: Vec<i64>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Application state injected into the dispatcher.
#[derive(Clone, Debug)]
pub struct AppState {
    pub settings: Settings,
    pub ledger: UpdateLedger,
    pub channels: ChannelRegistry,
    extra: BTreeMap<String, serde_yaml::Value>,
}

impl AppState {
    pub fn from_document(doc: StoreDocument) -> Self {
        let ledger = UpdateLedger::new(doc.update_log, doc.settings.tg_update_log_max_size);
        Self {
            ledger,
            channels: ChannelRegistry::new(doc.channel_ids),
            settings: doc.settings,
            extra: doc.extra,
        }
    }

    pub fn to_document(&self) -> StoreDocument {
        StoreDocument {
            settings: self.settings.clone(),
            update_log: self.ledger.ids(),
            channel_ids: self.channels.iter().map(|c| c.0).collect(),
            extra: self.extra.clone(),
        }
    }
}
