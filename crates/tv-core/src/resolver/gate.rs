use std::future::Future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::StreamDescriptor;
use crate::channel::ChannelKey;

/// The descriptor most recently handed to the Playback Surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveStream {
    pub generation: u64,
    pub channel: ChannelKey,
    pub source_index: usize,
    pub descriptor: StreamDescriptor,
}

/// Handle carried by one in-flight resolve.
#[derive(Debug, Clone)]
pub struct ResolveTicket {
    generation: u64,
    token: CancellationToken,
}

impl ResolveTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drive `fut` until it finishes or this ticket is superseded.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

/// Generation counter for resolves.  Owned by the session loop; only results
/// whose generation is still current may reach the active descriptor.
#[derive(Debug)]
pub struct ResolveGate {
    generation: u64,
    token: CancellationToken,
    active: watch::Sender<Option<ActiveStream>>,
}

impl Default for ResolveGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolveGate {
    pub fn new() -> Self {
        let (active, _) = watch::channel(None);
        Self {
            generation: 0,
            token: CancellationToken::new(),
            active,
        }
    }

    /// Start a new resolve, cancelling whatever was in flight.
    pub fn begin(&mut self) -> ResolveTicket {
        self.token.cancel();
        self.generation += 1;
        self.token = CancellationToken::new();
        debug!("resolve gate: generation {}", self.generation);
        ResolveTicket {
            generation: self.generation,
            token: self.token.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && !self.token.is_cancelled()
    }

    /// Cancel the in-flight resolve without starting a new one.
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.generation += 1;
    }

    /// Publish a finished resolve.  Returns false (and publishes nothing) for
    /// stale generations.
    pub fn publish(&self, stream: ActiveStream) -> bool {
        if !self.is_current(stream.generation) {
            debug!(
                "resolve gate: dropping stale result (generation {}, current {})",
                stream.generation, self.generation
            );
            return false;
        }
        self.active.send_replace(Some(stream));
        true
    }

    pub fn clear(&self) {
        self.active.send_if_modified(|active| active.take().is_some());
    }

    pub fn active(&self) -> Option<ActiveStream> {
        self.active.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ActiveStream>> {
        self.active.subscribe()
    }
}
