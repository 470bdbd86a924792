//! Catalog store: parsed channel records plus the overlay and preferences
//! that shape them into the category list the user navigates.
//!
//! Build pipeline (run on every import and every user edit):
//!   1. drop channels the user removed, group by raw category name
//!   2. order + rename organic categories from the overlay
//!   3. order + rename channels inside each category from the overlay
//!   4. rebuild the synthetic "Favorites" and "All" categories
//!   5. reassign `Channel::id` to the position in the flattened "All" list
//!
//! Ids are positions, not content hashes.  Anything that must survive a
//! rebuild is keyed by `ChannelKey` instead.

pub mod fetch;
pub mod parse;

use anyhow::bail;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::channel::{
    Category, CategoryKind, Channel, ChannelKey, ChannelRecord, ChannelRef, ChannelStatus,
    StatusCell, ALL, FAVORITES, SYNTHETIC_COUNT,
};
use crate::overlay::{sort_by_order, Overlay};
use crate::prefs::PreferenceStore;

pub use fetch::{
    fetch_catalog, CatalogLoadError, CatalogSource, FetchOptions, LoadCause, ProgressSender,
    StorageGrant, PROGRESS_CONNECT, PROGRESS_FETCHED, PROGRESS_IDLE, PROGRESS_PARSED,
};
pub use parse::{parse_catalog, ParsedCatalog, DEFAULT_GROUP};

/// An immutable, fully built view of the catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    categories: Vec<Category>,
    channels: Vec<ChannelRef>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            categories: vec![
                synthetic(FAVORITES, CategoryKind::Favorites, Vec::new()),
                synthetic(ALL, CategoryKind::All, Vec::new()),
            ],
            channels: Vec::new(),
        }
    }
}

impl Catalog {
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, index: usize) -> Option<&Category> {
        self.categories.get(index)
    }

    /// Every channel in "All" order; `channels()[id].id == id`.
    pub fn channels(&self) -> &[ChannelRef] {
        &self.channels
    }

    pub fn channel(&self, id: usize) -> Option<&ChannelRef> {
        self.channels.get(id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn find_by_key(&self, key: &ChannelKey) -> Option<&ChannelRef> {
        self.channels.iter().find(|c| &c.key == key)
    }

    /// The copy of `key` parsed into category `home`.  The same source can
    /// appear under several groups; falls back to the first copy when that
    /// group no longer holds it.
    pub fn locate(&self, home: &str, key: &ChannelKey) -> Option<&ChannelRef> {
        self.channels
            .iter()
            .find(|c| &c.key == key && c.category == home)
            .or_else(|| self.find_by_key(key))
    }

    /// Index of the organic category with the given original name.
    pub fn organic_index(&self, original_name: &str) -> Option<usize> {
        self.categories
            .iter()
            .position(|c| c.kind == CategoryKind::Organic && c.original_name == original_name)
    }

    /// Index of the organic category `channel_id` was parsed into.
    pub fn home_category(&self, channel_id: usize) -> Option<usize> {
        let channel = self.channel(channel_id)?;
        self.organic_index(&channel.category)
    }

    /// Member ids of every category, index-aligned with `categories()`.
    pub fn membership(&self) -> Vec<Vec<usize>> {
        self.categories.iter().map(Category::member_ids).collect()
    }

    /// Channels whose title or category (original or renamed) contains every
    /// word of `query`.
    pub fn search(&self, query: &str) -> Vec<ChannelRef> {
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if words.is_empty() {
            return self.channels.clone();
        }
        let display: HashMap<&str, &str> = self
            .categories
            .iter()
            .filter(|c| c.kind == CategoryKind::Organic)
            .map(|c| (c.original_name.as_str(), c.name.as_str()))
            .collect();
        self.channels
            .iter()
            .filter(|c| {
                let shown = display.get(c.category.as_str()).copied().unwrap_or_default();
                let haystack = format!("{} {} {}", c.title, c.category, shown).to_lowercase();
                words.iter().all(|w| haystack.contains(w.as_str()))
            })
            .cloned()
            .collect()
    }
}

fn synthetic(name: &str, kind: CategoryKind, channels: Vec<ChannelRef>) -> Category {
    Category {
        name: name.to_string(),
        original_name: name.to_string(),
        kind,
        favorite: false,
        channels,
    }
}

/// Owner of the parsed records, the overlay and the preference store.
pub struct CatalogStore {
    records: Vec<ChannelRecord>,
    skipped: usize,
    location: Option<String>,
    statuses: HashMap<ChannelKey, StatusCell>,
    overlay: Overlay,
    prefs: PreferenceStore,
    catalog: Catalog,
}

impl CatalogStore {
    pub fn new(overlay: Overlay, prefs: PreferenceStore) -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
            location: None,
            statuses: HashMap::new(),
            overlay,
            prefs,
            catalog: Catalog::default(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn prefs(&self) -> &PreferenceStore {
        &self.prefs
    }

    pub fn prefs_mut(&mut self) -> &mut PreferenceStore {
        &mut self.prefs
    }

    /// Entries skipped by the last successful parse.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Description of the source the current records came from.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Fetch, parse and apply `source` in one step.  On failure the current
    /// catalog is kept.
    pub async fn load(
        &mut self,
        source: &CatalogSource,
        options: &FetchOptions,
        progress: Option<&ProgressSender>,
    ) -> Result<&Catalog, CatalogLoadError> {
        let parsed = fetch_catalog(source, options, progress).await?;
        self.apply_import(parsed, source.describe());
        Ok(&self.catalog)
    }

    /// Replace the parsed records and rebuild.
    pub fn apply_import(&mut self, parsed: ParsedCatalog, location: String) {
        info!(
            "Catalog: applying {} records from {} ({} skipped)",
            parsed.records.len(),
            location,
            parsed.skipped
        );
        self.records = parsed.records;
        self.skipped = parsed.skipped;
        self.location = Some(location);
        self.refresh();
    }

    /// Re-run the overlay/synthetic/id steps on the records already parsed.
    pub fn refresh(&mut self) -> &Catalog {
        let mut groups: Vec<(String, Vec<&ChannelRecord>)> = Vec::new();
        let mut group_index: HashMap<&str, usize> = HashMap::new();
        let mut seen: HashSet<(&str, ChannelKey)> = HashSet::new();

        for record in &self.records {
            let key = record.key();
            if self.overlay.is_removed(&key) {
                continue;
            }
            if !seen.insert((record.category.as_str(), key)) {
                debug!("Catalog: duplicate {} in {}", record.title, record.category);
                continue;
            }
            let idx = *group_index
                .entry(record.category.as_str())
                .or_insert_with(|| {
                    groups.push((record.category.clone(), Vec::new()));
                    groups.len() - 1
                });
            groups[idx].1.push(record);
        }

        sort_by_order(&mut groups, self.overlay.category_order(), |(name, _)| name);

        let mut statuses = HashMap::new();
        let mut channels: Vec<ChannelRef> = Vec::new();
        let mut organic: Vec<Category> = Vec::with_capacity(groups.len());

        for (original_name, records) in groups {
            let mut order: Vec<(ChannelKey, &ChannelRecord)> =
                records.into_iter().map(|r| (r.key(), r)).collect();
            sort_by_order(&mut order, self.overlay.channel_order(&original_name), |(k, _)| k);

            let mut members = Vec::with_capacity(order.len());
            for (key, record) in order {
                let status = statuses
                    .entry(key.clone())
                    .or_insert_with(|| {
                        self.statuses
                            .get(&key)
                            .cloned()
                            .unwrap_or_else(|| StatusCell::new(ChannelStatus::default()))
                    })
                    .clone();
                let liked = self.prefs.is_liked(&key);
                status.update(|s| s.liked = liked);

                let title = self
                    .overlay
                    .channel_display_name(&original_name, &key)
                    .map(str::to_string)
                    .unwrap_or_else(|| record.title.clone());

                let channel = Arc::new(Channel {
                    id: channels.len(),
                    key,
                    title,
                    original_title: record.title.clone(),
                    logo: record.logo.clone(),
                    category: original_name.clone(),
                    sources: record.sources.clone(),
                    status,
                });
                channels.push(Arc::clone(&channel));
                members.push(channel);
            }

            organic.push(Category {
                name: self.overlay.category_display_name(&original_name).to_string(),
                favorite: self.prefs.is_favorite_category(&original_name),
                original_name,
                kind: CategoryKind::Organic,
                channels: members,
            });
        }

        let favorites: Vec<ChannelRef> = channels
            .iter()
            .filter(|c| c.is_liked())
            .cloned()
            .collect();

        let mut categories = Vec::with_capacity(SYNTHETIC_COUNT + organic.len());
        categories.push(synthetic(FAVORITES, CategoryKind::Favorites, favorites));
        categories.push(synthetic(ALL, CategoryKind::All, channels.clone()));
        categories.extend(organic);

        debug!(
            "Catalog: rebuilt {} categories, {} channels",
            categories.len(),
            channels.len()
        );
        self.statuses = statuses;
        self.catalog = Catalog {
            categories,
            channels,
        };
        &self.catalog
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    pub fn rename(&mut self, original_name: &str, new_name: &str) -> anyhow::Result<()> {
        self.require_organic(original_name)?;
        self.overlay.save_category_rename(original_name, new_name)?;
        self.refresh();
        Ok(())
    }

    /// Persist a new organic category order, given as original names.
    /// Synthetic and unknown names are dropped.
    pub fn reorder_categories(&mut self, order: Vec<String>) -> anyhow::Result<()> {
        let order: Vec<String> = order
            .into_iter()
            .filter(|name| self.catalog.organic_index(name).is_some())
            .collect();
        self.overlay.save_category_order(order)?;
        self.refresh();
        Ok(())
    }

    pub fn reorder_channels(
        &mut self,
        category: &str,
        order: Vec<ChannelKey>,
    ) -> anyhow::Result<()> {
        self.require_organic(category)?;
        self.overlay.save_channel_order(category, order)?;
        self.refresh();
        Ok(())
    }

    pub fn rename_channel(
        &mut self,
        category: &str,
        key: &ChannelKey,
        new_title: &str,
    ) -> anyhow::Result<()> {
        self.require_organic(category)?;
        self.overlay.save_channel_rename(category, key, new_title)?;
        self.refresh();
        Ok(())
    }

    pub fn remove_channel(&mut self, key: &ChannelKey) -> anyhow::Result<()> {
        if self.catalog.find_by_key(key).is_none() {
            bail!("unknown channel {}", key);
        }
        self.overlay.save_removed_channel(key)?;
        self.refresh();
        Ok(())
    }

    /// Flip the liked flag of the channel currently at `channel_id`.
    pub fn toggle_like(&mut self, channel_id: usize) -> anyhow::Result<bool> {
        let Some(channel) = self.catalog.channel(channel_id).cloned() else {
            bail!("no channel with id {}", channel_id);
        };
        let liked = self.prefs.toggle_liked(&channel.key)?;
        channel.status.update(|s| s.liked = liked);
        self.refresh();
        Ok(liked)
    }

    pub fn toggle_category_favorite(&mut self, original_name: &str) -> anyhow::Result<bool> {
        self.require_organic(original_name)?;
        let favorite = self.prefs.toggle_favorite_category(original_name)?;
        self.refresh();
        Ok(favorite)
    }

    pub fn set_audio_track(&mut self, channel_id: usize, track: usize) -> anyhow::Result<()> {
        let Some(channel) = self.catalog.channel(channel_id) else {
            bail!("no channel with id {}", channel_id);
        };
        let key = channel.key.clone();
        self.prefs.set_audio_track(&key, track)
    }

    pub fn audio_track(&self, channel_id: usize) -> Option<usize> {
        let channel = self.catalog.channel(channel_id)?;
        self.prefs.audio_track(&channel.key)
    }

    /// Clear every rename, ordering and removal.
    pub fn reset_overlay(&mut self) -> anyhow::Result<()> {
        self.overlay.reset_all()?;
        self.refresh();
        Ok(())
    }

    /// Clear likes, favorite categories and per-channel choices.
    pub fn reset_preferences(&mut self) -> anyhow::Result<()> {
        self.prefs.reset_all()?;
        self.refresh();
        Ok(())
    }

    fn require_organic(&self, original_name: &str) -> anyhow::Result<()> {
        if self.catalog.organic_index(original_name).is_some() {
            return Ok(());
        }
        if original_name == FAVORITES || original_name == ALL {
            bail!("{} is a built-in category and cannot be edited", original_name);
        }
        bail!("unknown category {}", original_name)
    }
}

/// Index of the first organic category.
pub const FIRST_ORGANIC_INDEX: usize = SYNTHETIC_COUNT;
