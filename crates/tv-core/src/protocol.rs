use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::channel::{CategoryKind, ChannelKey, ChannelStatus};
use crate::navigation::Cursor;
use crate::playback::PlaybackEvent;
use crate::resolver::StreamDescriptor;

/// Bump when the wire format changes in a breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent to the session (one JSON object per line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Fetch and parse a catalog.  `None` re-imports the configured source.
    Import {
        #[serde(default)]
        source: Option<String>,
    },
    Refresh,
    SelectCategory { index: usize },
    SelectChannel { id: usize },
    /// Jump to a channel and its home category.
    Tune { id: usize },
    Next,
    Prev,
    Random,
    Stop,
    RenameCategory { original: String, name: String },
    ReorderCategories { order: Vec<String> },
    ReorderChannels { category: String, order: Vec<ChannelKey> },
    RenameChannel { category: String, key: ChannelKey, name: String },
    RemoveChannel { key: ChannelKey },
    ToggleLike { id: usize },
    ToggleCategoryFavorite { name: String },
    SetAudioTrack { id: usize, track: usize },
    /// Persist the next/previous direction swap.
    SetReversed { reversed: bool },
    ResetOverlay,
    /// Forget likes, favorite categories, audio tracks and the last channel.
    ResetPreferences,
    Search { query: String },
    /// Playback Surface callback relayed by an external player.
    Report { generation: u64, event: PlaybackEvent },
    GetState,
    Quit,
}

impl Command {
    /// Commands that move the cursor (and so resume playback after `Stop`).
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            Self::SelectCategory { .. }
                | Self::SelectChannel { .. }
                | Self::Tune { .. }
                | Self::Next
                | Self::Prev
                | Self::Random
        )
    }
}

/// Messages sent from the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent once at startup with the full snapshot.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: SessionState,
    },
    State {
        data: SessionState,
    },
    /// A channel's observable status changed.
    Status {
        channel_id: usize,
        status: ChannelStatus,
    },
    /// A descriptor was handed to the Playback Surface.  `license` is the
    /// ClearKey JSON Web Key set for DRM streams, ready to serve as a local
    /// license response.
    Stream {
        generation: u64,
        channel_id: usize,
        descriptor: StreamDescriptor,
        #[serde(default)]
        license: Option<String>,
    },
    Progress {
        value: u8,
    },
    SearchResults {
        query: String,
        ids: Vec<usize>,
    },
    /// Transient, user-visible message (e.g. a failed import).
    Notice {
        message: String,
    },
    Error {
        message: String,
    },
    /// Warning or error line from the session log.
    Log {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryView {
    pub name: String,
    pub original_name: String,
    pub kind: CategoryKind,
    pub favorite: bool,
    pub channel_ids: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelView {
    pub id: usize,
    pub key: ChannelKey,
    pub title: String,
    pub logo: String,
    pub category: String,
    pub source_count: usize,
    pub status: ChannelStatus,
}

/// Full snapshot of the session.  `rev` increases on every observable change.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionState {
    #[serde(default)]
    pub rev: u64,
    pub categories: Vec<CategoryView>,
    pub channels: Vec<ChannelView>,
    pub selected_category: usize,
    pub selected_channel: Option<usize>,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub catalog_location: Option<String>,
    #[serde(default)]
    pub skipped_entries: usize,
}

impl SessionState {
    pub fn build(catalog: &Catalog, cursor: Cursor, rev: u64) -> Self {
        Self {
            rev,
            categories: catalog
                .categories()
                .iter()
                .map(|c| CategoryView {
                    name: c.name.clone(),
                    original_name: c.original_name.clone(),
                    kind: c.kind,
                    favorite: c.favorite,
                    channel_ids: c.member_ids(),
                })
                .collect(),
            channels: catalog
                .channels()
                .iter()
                .map(|c| ChannelView {
                    id: c.id,
                    key: c.key.clone(),
                    title: c.title.clone(),
                    logo: c.logo.clone(),
                    category: c.category.clone(),
                    source_count: c.sources.len(),
                    status: c.status.get(),
                })
                .collect(),
            selected_category: cursor.category,
            selected_channel: cursor.channel,
            ..Self::default()
        }
    }
}

/// Wrapper for line-delimited JSON transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode_line(&self) -> anyhow::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode_line(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            anyhow::bail!("empty message line");
        }
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_decode() {
        let msg = Message::decode_line(r#"{"cmd":"SelectChannel","id":5}"#).unwrap();
        match msg {
            Message::Command(Command::SelectChannel { id }) => assert_eq!(id, 5),
            other => panic!("wrong message: {other:?}"),
        }

        let msg = Message::decode_line(r#"{"cmd":"Import"}"#).unwrap();
        assert!(matches!(
            msg,
            Message::Command(Command::Import { source: None })
        ));
    }

    #[test]
    fn test_report_carries_playback_event() {
        let line = r#"{"cmd":"Report","generation":3,"event":{"kind":"Error","message":"403"}}"#;
        match Message::decode_line(line).unwrap() {
            Message::Command(Command::Report { generation, event }) => {
                assert_eq!(generation, 3);
                assert_eq!(event, PlaybackEvent::Error { message: "403".into() });
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn test_hello_encode_decode() {
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: 42,
            state: SessionState {
                rev: 42,
                ..Default::default()
            },
        });
        let line = msg.encode_line().unwrap();
        assert!(line.ends_with('\n'));
        match Message::decode_line(&line).unwrap() {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 42);
                assert_eq!(state.rev, 42);
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn test_empty_line_rejected() {
        assert!(Message::decode_line("   ").is_err());
    }
}
