use tracing::info;
use tv_core::playback::PlaybackSurface;
use tv_core::resolver::{ActiveStream, TargetDecoder};

/// Headless surface: hands nothing to a decoder, only records what would have
/// been played.  An external player attached to the console picks up the
/// `Stream` broadcast and reports back with `Report` commands.
#[derive(Debug, Default)]
pub struct LogSurface {
    current: Option<u64>,
}

impl LogSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackSurface for LogSurface {
    fn play(&mut self, stream: &ActiveStream, audio_track: Option<usize>) -> anyhow::Result<()> {
        let d = &stream.descriptor;
        let target = match d.target {
            TargetDecoder::Native => "native",
            TargetDecoder::EmbeddedBrowser => "browser",
        };
        info!(
            "LogSurface: #{} {} -> {} {} (headers: {}, drm: {}, audio track: {:?})",
            stream.generation,
            stream.channel,
            target,
            d.media_url,
            d.http_headers.len(),
            d.drm.is_some(),
            audio_track
        );
        self.current = Some(stream.generation);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(generation) = self.current.take() {
            info!("LogSurface: stopped #{}", generation);
        }
    }
}
