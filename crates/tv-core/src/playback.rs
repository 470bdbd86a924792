//! Seam between the session and whatever actually decodes the stream.

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelStatus, PlaybackPhase};
use crate::resolver::ActiveStream;

/// Callback reported by a Playback Surface for the stream of `generation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PlaybackEvent {
    Ready,
    Error { message: String },
    VideoQualityChanged { label: String },
    AudioQualityChanged { label: String },
}

impl PlaybackEvent {
    /// Fold the event into a channel status.
    pub fn apply(&self, status: &mut ChannelStatus) {
        match self {
            Self::Ready => {
                status.phase = PlaybackPhase::Playing;
                status.error = None;
            }
            Self::Error { message } => {
                status.phase = PlaybackPhase::Error;
                status.error = Some(message.clone());
            }
            Self::VideoQualityChanged { label } => status.video_quality = Some(label.clone()),
            Self::AudioQualityChanged { label } => status.audio_quality = Some(label.clone()),
        }
    }
}

/// Native decoder or embedded browser.  Implementations report progress as
/// `PlaybackEvent`s tagged with `ActiveStream::generation`.
pub trait PlaybackSurface: Send {
    fn play(&mut self, stream: &ActiveStream, audio_track: Option<usize>) -> anyhow::Result<()>;

    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_fold_into_status() {
        let mut status = ChannelStatus {
            phase: PlaybackPhase::Connecting,
            error: Some("old".into()),
            ..ChannelStatus::default()
        };
        PlaybackEvent::VideoQualityChanged { label: "1080p".into() }.apply(&mut status);
        PlaybackEvent::Ready.apply(&mut status);
        assert_eq!(status.phase, PlaybackPhase::Playing);
        assert_eq!(status.error, None);
        assert_eq!(status.video_quality.as_deref(), Some("1080p"));

        PlaybackEvent::Error { message: "decoder died".into() }.apply(&mut status);
        assert_eq!(status.phase, PlaybackPhase::Error);
        assert_eq!(status.error.as_deref(), Some("decoder died"));
    }

    #[test]
    fn test_event_wire_format() {
        let event: PlaybackEvent =
            serde_json::from_str(r#"{"kind":"AudioQualityChanged","label":"stereo 128k"}"#).unwrap();
        assert_eq!(
            event,
            PlaybackEvent::AudioQualityChanged { label: "stereo 128k".into() }
        );
    }
}
