//! Preference store: liked channels, favorite categories, audio-track choice,
//! last tuned channel and a bag of simple settings.
//!
//! Everything lives in one JSON document that is rewritten as a whole on each
//! change, so a crash mid-write leaves the previous version in place.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::channel::ChannelKey;
use crate::platform;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub liked: BTreeSet<ChannelKey>,
    #[serde(default)]
    pub favorite_categories: BTreeSet<String>,
    #[serde(default)]
    pub audio_tracks: BTreeMap<ChannelKey, usize>,
    #[serde(default)]
    pub last_channel: Option<ChannelKey>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

pub struct PreferenceStore {
    path: PathBuf,
    prefs: Preferences,
}

impl PreferenceStore {
    /// Open the store at `path`.  A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let prefs = load_prefs(&path);
        Self { path, prefs }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> &Preferences {
        &self.prefs
    }

    pub fn is_liked(&self, key: &ChannelKey) -> bool {
        self.prefs.liked.contains(key)
    }

    /// Flip the liked flag and return the new value.
    pub fn toggle_liked(&mut self, key: &ChannelKey) -> anyhow::Result<bool> {
        let liked = !self.prefs.liked.contains(key);
        self.commit(|p| {
            if liked {
                p.liked.insert(key.clone());
            } else {
                p.liked.remove(key);
            }
        })?;
        Ok(liked)
    }

    pub fn is_favorite_category(&self, name: &str) -> bool {
        self.prefs.favorite_categories.contains(name)
    }

    pub fn toggle_favorite_category(&mut self, name: &str) -> anyhow::Result<bool> {
        let favorite = !self.prefs.favorite_categories.contains(name);
        self.commit(|p| {
            if favorite {
                p.favorite_categories.insert(name.to_string());
            } else {
                p.favorite_categories.remove(name);
            }
        })?;
        Ok(favorite)
    }

    pub fn audio_track(&self, key: &ChannelKey) -> Option<usize> {
        self.prefs.audio_tracks.get(key).copied()
    }

    pub fn set_audio_track(&mut self, key: &ChannelKey, track: usize) -> anyhow::Result<()> {
        self.commit(|p| {
            p.audio_tracks.insert(key.clone(), track);
        })
    }

    pub fn last_channel(&self) -> Option<&ChannelKey> {
        self.prefs.last_channel.as_ref()
    }

    pub fn set_last_channel(&mut self, key: Option<ChannelKey>) -> anyhow::Result<()> {
        self.commit(|p| p.last_channel = key)
    }

    pub fn setting(&self, name: &str) -> Option<&str> {
        self.prefs.settings.get(name).map(String::as_str)
    }

    pub fn set_setting(&mut self, name: &str, value: &str) -> anyhow::Result<()> {
        self.commit(|p| {
            p.settings.insert(name.to_string(), value.to_string());
        })
    }

    /// Drop every per-channel and per-category preference.  Settings survive.
    pub fn reset_all(&mut self) -> anyhow::Result<()> {
        self.commit(|p| {
            *p = Preferences {
                settings: std::mem::take(&mut p.settings),
                ..Preferences::default()
            }
        })
    }

    /// Edit a copy, write it, then swap it in.  A failed write leaves memory
    /// matching the file.
    fn commit(&mut self, edit: impl FnOnce(&mut Preferences)) -> anyhow::Result<()> {
        let mut next = self.prefs.clone();
        edit(&mut next);
        if next == self.prefs {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(&next)?;
        platform::write_atomic(&self.path, json.as_bytes())
            .with_context(|| format!("writing preferences to {}", self.path.display()))?;
        self.prefs = next;
        Ok(())
    }
}

fn load_prefs(path: &Path) -> Preferences {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Preferences::default();
    };
    match serde_json::from_str(&content) {
        Ok(prefs) => prefs,
        Err(e) => {
            warn!("Ignoring unreadable preferences {}: {}", path.display(), e);
            Preferences::default()
        }
    }
}
