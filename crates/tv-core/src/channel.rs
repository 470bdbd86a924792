//! Channel and category records shared by the catalog, navigation and the
//! session loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

pub const FAVORITES: &str = "Favorites";
pub const ALL: &str = "All";

/// Index of the synthetic "Favorites" category.
pub const FAVORITES_INDEX: usize = 0;
/// Index of the synthetic "All" category.
pub const ALL_INDEX: usize = 1;
/// Number of synthetic categories ahead of the organic ones.
pub const SYNTHETIC_COUNT: usize = 2;

/// Stable content identity of a channel: its first source URI, or its title
/// when it has none.  Persisted preferences and overlay entries are keyed by
/// this, never by the position-derived `Channel::id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(pub String);

impl ChannelKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Playback phase of a channel as reported by the session and the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Resolving,
    Connecting,
    Playing,
    Error,
}

/// Mutable, observable part of a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub phase: PlaybackPhase,
    pub video_quality: Option<String>,
    pub audio_quality: Option<String>,
    pub error: Option<String>,
    pub liked: bool,
    /// Which entry of `Channel::sources` is currently in use.
    pub source_index: usize,
}

/// Shared status holder.  Survives catalog rebuilds so that subscribers keep
/// following the same logical channel after it moves.
#[derive(Debug, Clone)]
pub struct StatusCell(Arc<watch::Sender<ChannelStatus>>);

impl StatusCell {
    pub fn new(status: ChannelStatus) -> Self {
        let (tx, _rx) = watch::channel(status);
        Self(Arc::new(tx))
    }

    pub fn get(&self) -> ChannelStatus {
        self.0.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.0.subscribe()
    }

    /// Apply `f` and notify subscribers only when the status actually changed.
    pub fn update(&self, f: impl FnOnce(&mut ChannelStatus)) -> bool {
        self.0.send_if_modified(|status| {
            let before = status.clone();
            f(status);
            *status != before
        })
    }
}

/// One parsed catalog entry, before overlay and id assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub title: String,
    pub logo: String,
    pub category: String,
    pub sources: Vec<String>,
}

impl ChannelRecord {
    pub fn key(&self) -> ChannelKey {
        match self.sources.first() {
            Some(uri) if !uri.is_empty() => ChannelKey(uri.clone()),
            _ => ChannelKey(self.title.clone()),
        }
    }
}

/// A tunable channel as seen after a catalog build.
#[derive(Debug)]
pub struct Channel {
    /// Position in the flattened "All" ordering.  Reassigned on every build.
    pub id: usize,
    pub key: ChannelKey,
    /// Display title (after any user rename).
    pub title: String,
    pub original_title: String,
    pub logo: String,
    /// Original (pre-rename) organic category name.
    pub category: String,
    pub sources: Vec<String>,
    pub status: StatusCell,
}

impl Channel {
    pub fn primary_source(&self) -> Option<&str> {
        self.sources.first().map(String::as_str)
    }

    pub fn is_liked(&self) -> bool {
        self.status.get().liked
    }
}

pub type ChannelRef = Arc<Channel>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryKind {
    Favorites,
    All,
    Organic,
}

#[derive(Debug, Clone)]
pub struct Category {
    /// Display name (after any user rename).
    pub name: String,
    pub original_name: String,
    pub kind: CategoryKind,
    pub favorite: bool,
    pub channels: Vec<ChannelRef>,
}

impl Category {
    pub fn is_synthetic(&self) -> bool {
        self.kind != CategoryKind::Organic
    }

    pub fn contains(&self, channel_id: usize) -> bool {
        self.channels.iter().any(|c| c.id == channel_id)
    }

    /// Global ids of the members, in category order.
    pub fn member_ids(&self) -> Vec<usize> {
        self.channels.iter().map(|c| c.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key_prefers_first_source() {
        let record = ChannelRecord {
            title: "News One".into(),
            logo: String::new(),
            category: "News".into(),
            sources: vec!["http://a/1.m3u8".into(), "http://b/1.m3u8".into()],
        };
        assert_eq!(record.key().as_str(), "http://a/1.m3u8");

        let untitled = ChannelRecord {
            sources: Vec::new(),
            ..record
        };
        assert_eq!(untitled.key().as_str(), "News One");
    }

    #[test]
    fn test_status_cell_notifies_only_on_change() {
        let cell = StatusCell::new(ChannelStatus::default());
        let mut rx = cell.subscribe();
        assert!(!cell.update(|s| s.liked = false));
        assert!(!rx.has_changed().unwrap());
        assert!(cell.update(|s| s.error = Some("boom".into())));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().error.as_deref(), Some("boom"));
    }
}
