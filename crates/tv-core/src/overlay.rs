//! Order/rename overlay: the user's customisations layered on top of the
//! parsed catalog.
//!
//! Keys are always *original* names (categories) or `ChannelKey`s (channels),
//! so the overlay stays valid across re-imports of the same source.  Every
//! save replaces the whole document on disk via temp-file + rename.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::channel::ChannelKey;
use crate::platform;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayData {
    #[serde(default)]
    pub category_order: Vec<String>,
    #[serde(default)]
    pub removed: BTreeSet<ChannelKey>,
    #[serde(default)]
    pub category_renames: BTreeMap<String, String>,
    /// category original name → channel keys in user order
    #[serde(default)]
    pub channel_orders: BTreeMap<String, Vec<ChannelKey>>,
    /// category original name → channel key → display title
    #[serde(default)]
    pub channel_renames: BTreeMap<String, BTreeMap<ChannelKey, String>>,
}

pub struct Overlay {
    path: PathBuf,
    data: OverlayData,
}

impl Overlay {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = load_overlay(&path);
        Self { path, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &OverlayData {
        &self.data
    }

    // ── Categories ───────────────────────────────────────────────────────────

    pub fn category_renames(&self) -> &BTreeMap<String, String> {
        &self.data.category_renames
    }

    pub fn category_display_name<'a>(&'a self, original: &'a str) -> &'a str {
        self.data
            .category_renames
            .get(original)
            .map(String::as_str)
            .unwrap_or(original)
    }

    /// Rename `original` to `display`.  An empty display name, or one equal
    /// to the original, removes the rename.
    pub fn save_category_rename(&mut self, original: &str, display: &str) -> anyhow::Result<()> {
        let display = display.trim();
        self.commit(|data| {
            if display.is_empty() || display == original {
                data.category_renames.remove(original);
            } else {
                data.category_renames
                    .insert(original.to_string(), display.to_string());
            }
        })
    }

    pub fn category_order(&self) -> &[String] {
        &self.data.category_order
    }

    pub fn save_category_order(&mut self, order: Vec<String>) -> anyhow::Result<()> {
        self.commit(|data| data.category_order = dedup(order))
    }

    // ── Channels ─────────────────────────────────────────────────────────────

    pub fn channel_order(&self, category: &str) -> &[ChannelKey] {
        self.data
            .channel_orders
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn save_channel_order(
        &mut self,
        category: &str,
        order: Vec<ChannelKey>,
    ) -> anyhow::Result<()> {
        self.commit(|data| {
            let order = dedup(order);
            if order.is_empty() {
                data.channel_orders.remove(category);
            } else {
                data.channel_orders.insert(category.to_string(), order);
            }
        })
    }

    pub fn channel_renames(&self, category: &str) -> Option<&BTreeMap<ChannelKey, String>> {
        self.data.channel_renames.get(category)
    }

    pub fn channel_display_name(&self, category: &str, key: &ChannelKey) -> Option<&str> {
        self.channel_renames(category)
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }

    pub fn save_channel_rename(
        &mut self,
        category: &str,
        key: &ChannelKey,
        display: &str,
    ) -> anyhow::Result<()> {
        let display = display.trim();
        self.commit(|data| {
            let renames = data.channel_renames.entry(category.to_string()).or_default();
            if display.is_empty() {
                renames.remove(key);
            } else {
                renames.insert(key.clone(), display.to_string());
            }
            if renames.is_empty() {
                data.channel_renames.remove(category);
            }
        })
    }

    pub fn removed_channels(&self) -> &BTreeSet<ChannelKey> {
        &self.data.removed
    }

    pub fn is_removed(&self, key: &ChannelKey) -> bool {
        self.data.removed.contains(key)
    }

    pub fn save_removed_channel(&mut self, key: &ChannelKey) -> anyhow::Result<()> {
        if self.data.removed.contains(key) {
            return Ok(());
        }
        self.commit(|data| {
            data.removed.insert(key.clone());
        })
    }

    pub fn reset_all(&mut self) -> anyhow::Result<()> {
        info!("Overlay: clearing all renames, orderings and removals");
        self.commit(|data| *data = OverlayData::default())
    }

    /// Apply `edit` to a copy, persist the copy, and only then swap it in.
    /// A failed write leaves both the file and the in-memory overlay unchanged.
    fn commit(&mut self, edit: impl FnOnce(&mut OverlayData)) -> anyhow::Result<()> {
        let mut next = self.data.clone();
        edit(&mut next);
        if next == self.data {
            return Ok(());
        }
        let content = toml::to_string_pretty(&next)?;
        platform::write_atomic(&self.path, content.as_bytes())
            .with_context(|| format!("writing overlay to {}", self.path.display()))?;
        self.data = next;
        Ok(())
    }
}

fn load_overlay(path: &Path) -> OverlayData {
    let Ok(content) = std::fs::read_to_string(path) else {
        return OverlayData::default();
    };
    match toml::from_str(&content) {
        Ok(data) => data,
        Err(e) => {
            warn!("Ignoring unreadable overlay {}: {}", path.display(), e);
            OverlayData::default()
        }
    }
}

fn dedup<T: Clone + Eq + Hash>(items: Vec<T>) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Stable-sort `items` by the position of their key in `order`.  Items whose
/// key is absent from `order` keep their relative order and go last.
pub fn sort_by_order<T, K, F>(items: &mut [T], order: &[K], key_of: F)
where
    K: Eq + Hash,
    F: Fn(&T) -> &K,
{
    if order.is_empty() {
        return;
    }
    let rank: HashMap<&K, usize> = order.iter().enumerate().map(|(i, k)| (k, i)).collect();
    items.sort_by_key(|item| rank.get(key_of(item)).copied().unwrap_or(usize::MAX));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay() -> (tempfile::TempDir, Overlay) {
        let dir = tempfile::tempdir().unwrap();
        let overlay = Overlay::open(dir.path().join("overlay.toml"));
        (dir, overlay)
    }

    #[test]
    fn test_category_order_round_trip() {
        let (_dir, mut overlay) = overlay();
        let order = vec!["Sports".to_string(), "News".to_string(), "Kids".to_string()];
        overlay.save_category_order(order.clone()).unwrap();
        assert_eq!(overlay.category_order(), order.as_slice());

        let reopened = Overlay::open(overlay.path());
        assert_eq!(reopened.category_order(), order.as_slice());
    }

    #[test]
    fn test_save_order_replaces_previous() {
        let (_dir, mut overlay) = overlay();
        overlay
            .save_category_order(vec!["A".into(), "B".into(), "C".into()])
            .unwrap();
        overlay.save_category_order(vec!["C".into()]).unwrap();
        assert_eq!(overlay.category_order(), ["C".to_string()].as_slice());
    }

    #[test]
    fn test_rename_back_to_original_clears_entry() {
        let (_dir, mut overlay) = overlay();
        overlay.save_category_rename("News", "Top News").unwrap();
        assert_eq!(overlay.category_display_name("News"), "Top News");
        overlay.save_category_rename("News", "News").unwrap();
        assert!(overlay.category_renames().is_empty());
        assert_eq!(overlay.category_display_name("News"), "News");
    }

    #[test]
    fn test_channel_entries_persist_with_url_keys() {
        let (_dir, mut overlay) = overlay();
        let a = ChannelKey::from("http://cdn.example/a.m3u8?|referer=http://x");
        let b = ChannelKey::from("rtmp://live.example/b");
        overlay
            .save_channel_order("News", vec![b.clone(), a.clone()])
            .unwrap();
        overlay.save_channel_rename("News", &a, "Alpha").unwrap();
        overlay.save_removed_channel(&b).unwrap();

        let reopened = Overlay::open(overlay.path());
        assert_eq!(reopened.channel_order("News"), [b.clone(), a.clone()].as_slice());
        assert_eq!(reopened.channel_display_name("News", &a), Some("Alpha"));
        assert!(reopened.is_removed(&b));
        assert_eq!(reopened.removed_channels().len(), 1);
    }

    #[test]
    fn test_reset_all_clears_everything() {
        let (_dir, mut overlay) = overlay();
        overlay.save_category_rename("News", "Top News").unwrap();
        overlay.save_category_order(vec!["News".into()]).unwrap();
        overlay.reset_all().unwrap();
        assert_eq!(overlay.data(), &OverlayData::default());
        assert_eq!(Overlay::open(overlay.path()).data(), &OverlayData::default());
    }

    #[test]
    fn test_sort_by_order_is_stable_for_absent_keys() {
        let mut items = vec!["d", "a", "c", "b", "e"];
        let order = vec!["c", "a"];
        sort_by_order(&mut items, &order, |s| s);
        assert_eq!(items, vec!["c", "a", "d", "b", "e"]);
    }
}
