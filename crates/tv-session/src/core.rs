/// SessionCore: single-owner event loop for all mutable session state.
///
/// Owns the catalog store, the navigation cursor, the resolve gate and the
/// Playback Surface.  Console input (including surface reports relayed as
/// `Command::Report`), background imports and background resolves all arrive
/// as `SessionEvent`s; nothing else touches this state.
///
/// After each event the loop drains deferred navigation requests, retunes if
/// the cursor now points at a different channel, and broadcasts what changed.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use tv_core::catalog::{
    fetch_catalog, Catalog, CatalogLoadError, CatalogSource, CatalogStore, FetchOptions,
    ParsedCatalog, StorageGrant, PROGRESS_IDLE,
};
use tv_core::channel::{Channel, ChannelKey, ChannelRef, ChannelStatus, PlaybackPhase, ALL_INDEX};
use tv_core::config::Config;
use tv_core::navigation::{Layout, NavRequest, NavRequester, Navigation};
use tv_core::overlay::Overlay;
use tv_core::playback::{PlaybackEvent, PlaybackSurface};
use tv_core::prefs::PreferenceStore;
use tv_core::protocol::{Broadcast, Command, SessionState, PROTOCOL_VERSION};
use tv_core::resolver::{ActiveStream, Resolution, ResolveError, ResolveGate, StreamResolver};

/// Preference-store setting that overrides `navigation.reversed`.
const REVERSED_SETTING: &str = "navigation.reversed";

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A command from the console.
    Command(Command),
    /// A background import finished (or failed).
    ImportFinished {
        generation: u64,
        location: String,
        result: Result<ParsedCatalog, CatalogLoadError>,
    },
    /// A background resolve finished without being cancelled.
    ResolveFinished {
        generation: u64,
        channel: ChannelKey,
        source_index: usize,
        result: Result<Resolution, ResolveError>,
    },
    Shutdown,
}

/// A channel by identity: its key plus the group it was parsed into, since
/// one source may be listed under several groups.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    home: String,
    key: ChannelKey,
}

impl Slot {
    fn of(channel: &Channel) -> Self {
        Self {
            home: channel.category.clone(),
            key: channel.key.clone(),
        }
    }

    fn find<'a>(&self, catalog: &'a Catalog) -> Option<&'a ChannelRef> {
        catalog.locate(&self.home, &self.key)
    }
}

/// Where the cursor pointed before a catalog rebuild, by identity.
struct Anchor {
    category: Option<String>,
    channel: Option<Slot>,
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    config: Config,
    store: CatalogStore,
    nav: Navigation,
    nav_requests: NavRequester,
    resolver: Arc<StreamResolver>,
    gate: ResolveGate,
    surface: Box<dyn PlaybackSurface>,
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<Broadcast>,
    progress_tx: Arc<watch::Sender<u8>>,
    /// Generation of the import whose result may still be applied.
    import_generation: u64,
    /// Channel the current resolve/playback belongs to.
    tuned: Option<Slot>,
    /// Set by `Stop`; cleared by the next navigation command.
    stopped: bool,
    /// Bumped on catalog rebuilds; navigation keeps its own counter.
    rev: u64,
    last_published_rev: u64,
}

impl SessionCore {
    pub fn new(
        config: Config,
        surface: Box<dyn PlaybackSurface>,
        event_tx: mpsc::Sender<SessionEvent>,
        broadcast_tx: broadcast::Sender<Broadcast>,
    ) -> anyhow::Result<Self> {
        let store = CatalogStore::new(
            Overlay::open(&config.paths.overlay_file),
            PreferenceStore::open(&config.paths.prefs_file),
        );
        let reversed = match store.prefs().setting(REVERSED_SETTING) {
            Some(value) => value == "true",
            None => config.navigation.reversed,
        };
        let nav = Navigation::new(reversed);
        let nav_requests = nav.requester();
        let resolver = Arc::new(StreamResolver::new(&config.resolver)?);
        let (progress_tx, _) = watch::channel(PROGRESS_IDLE);

        Ok(Self {
            config,
            store,
            nav,
            nav_requests,
            resolver,
            gate: ResolveGate::new(),
            surface,
            event_tx,
            broadcast_tx,
            progress_tx: Arc::new(progress_tx),
            import_generation: 0,
            tuned: None,
            stopped: false,
            rev: 1,
            last_published_rev: 0,
        })
    }

    /// Run the event loop until `Shutdown`, `Quit`, or the channel closes.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");

        // Forward import progress to listeners.
        let mut progress_rx = self.progress_tx.subscribe();
        let progress_broadcast = self.broadcast_tx.clone();
        tokio::spawn(async move {
            while progress_rx.changed().await.is_ok() {
                let value = *progress_rx.borrow_and_update();
                let _ = progress_broadcast.send(Broadcast::Progress { value });
            }
        });

        let _ = self.broadcast_tx.send(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: self.state_rev(),
            state: self.snapshot(),
        });
        self.start_import(None);

        while let Some(event) = event_rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        info!("SessionCore: shutting down");
        self.gate.cancel();
        self.surface.stop();
        Ok(())
    }

    /// Process one event.  Returns false when the loop should stop.
    pub fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Shutdown => {
                info!("SessionCore: shutdown requested");
                return false;
            }
            SessionEvent::Command(Command::Quit) => {
                info!("SessionCore: quit requested");
                return false;
            }
            SessionEvent::Command(cmd) => {
                debug!("SessionCore: command {:?}", cmd);
                if let Err(e) = self.handle_command(cmd) {
                    error!("SessionCore: command error: {:#}", e);
                    let _ = self.broadcast_tx.send(Broadcast::Error {
                        message: format!("{e:#}"),
                    });
                }
            }
            SessionEvent::ImportFinished {
                generation,
                location,
                result,
            } => self.finish_import(generation, location, result),
            SessionEvent::ResolveFinished {
                generation,
                channel,
                source_index,
                result,
            } => self.finish_resolve(generation, channel, source_index, result),
        }
        self.settle();
        true
    }

    fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        if cmd.is_navigation() {
            self.stopped = false;
        }
        match cmd {
            Command::Import { source } => self.start_import(source),
            Command::Refresh => self.rebuild(|store| {
                store.refresh();
                Ok(())
            })?,
            Command::SelectCategory { index } => {
                if self.store.catalog().category(index).is_none() {
                    anyhow::bail!("no category at index {}", index);
                }
                self.request(NavRequest::SelectCategory(index));
            }
            Command::SelectChannel { id } => {
                if self.store.catalog().channel(id).is_none() {
                    anyhow::bail!("no channel with id {}", id);
                }
                self.request(NavRequest::SelectChannel(id));
            }
            Command::Tune { id } => {
                self.nav.set_by_channel_id(id)?;
            }
            Command::Next => self.request(NavRequest::Next),
            Command::Prev => self.request(NavRequest::Previous),
            Command::Random => self.request(NavRequest::Random),
            Command::Stop => self.stop(),
            Command::RenameCategory { original, name } => {
                self.rebuild(|store| store.rename(&original, &name))?
            }
            Command::ReorderCategories { order } => {
                self.rebuild(|store| store.reorder_categories(order))?
            }
            Command::ReorderChannels { category, order } => {
                self.rebuild(|store| store.reorder_channels(&category, order))?
            }
            Command::RenameChannel {
                category,
                key,
                name,
            } => self.rebuild(|store| store.rename_channel(&category, &key, &name))?,
            Command::RemoveChannel { key } => self.rebuild(|store| store.remove_channel(&key))?,
            Command::ToggleLike { id } => {
                self.rebuild(|store| store.toggle_like(id).map(|_| ()))?
            }
            Command::ToggleCategoryFavorite { name } => {
                self.rebuild(|store| store.toggle_category_favorite(&name).map(|_| ()))?
            }
            Command::SetAudioTrack { id, track } => self.store.set_audio_track(id, track)?,
            Command::SetReversed { reversed } => {
                self.store
                    .prefs_mut()
                    .set_setting(REVERSED_SETTING, if reversed { "true" } else { "false" })?;
                self.nav.set_reversed(reversed);
            }
            Command::ResetOverlay => self.rebuild(|store| store.reset_overlay())?,
            Command::ResetPreferences => self.rebuild(|store| store.reset_preferences())?,
            Command::Search { query } => {
                let ids = self
                    .store
                    .catalog()
                    .search(&query)
                    .iter()
                    .map(|c| c.id)
                    .collect();
                let _ = self
                    .broadcast_tx
                    .send(Broadcast::SearchResults { query, ids });
            }
            Command::Report { generation, event } => self.handle_playback(generation, event),
            Command::GetState => self.broadcast_state(),
            Command::Quit => {}
        }
        Ok(())
    }

    fn request(&self, request: NavRequest) {
        let _ = self.nav_requests.send(request);
    }

    /// Post-event bookkeeping: apply queued navigation, retune, publish.
    fn settle(&mut self) {
        self.nav.drain_requests();
        self.sync_tuning();
        if self.state_rev() != self.last_published_rev {
            self.broadcast_state();
        }
    }

    // ── Import ────────────────────────────────────────────────────────────────

    fn start_import(&mut self, source: Option<String>) {
        self.import_generation += 1;
        let generation = self.import_generation;
        let raw = source.unwrap_or_else(|| self.config.catalog.source.clone());
        let source = CatalogSource::parse(&raw);
        let options = FetchOptions {
            timeout: Duration::from_secs(self.config.catalog.fetch_timeout_secs.max(1)),
            storage: if self.config.catalog.allow_file {
                StorageGrant::Granted
            } else {
                StorageGrant::Denied
            },
        };
        info!(
            "SessionCore: import #{} from {}",
            generation,
            source.describe()
        );

        let progress = Arc::clone(&self.progress_tx);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = fetch_catalog(&source, &options, Some(progress.as_ref())).await;
            let _ = tx
                .send(SessionEvent::ImportFinished {
                    generation,
                    location: source.describe(),
                    result,
                })
                .await;
        });
    }

    fn finish_import(
        &mut self,
        generation: u64,
        location: String,
        result: Result<ParsedCatalog, CatalogLoadError>,
    ) {
        if generation != self.import_generation {
            info!(
                "SessionCore: dropping superseded import #{} ({})",
                generation, location
            );
            return;
        }
        match result {
            Ok(parsed) => {
                let first_load = self.store.location().is_none();
                let anchor = self.anchor();
                self.store.apply_import(parsed, location);
                self.rebase(anchor);
                if first_load {
                    self.restore_last_channel();
                }
            }
            Err(e) => {
                warn!("SessionCore: {}", e);
                let _ = self.broadcast_tx.send(Broadcast::Notice {
                    message: format!("Could not load channels: {}", e.cause),
                });
            }
        }
    }

    fn restore_last_channel(&mut self) {
        let last = self
            .store
            .prefs()
            .last_channel()
            .and_then(|key| self.store.catalog().find_by_key(key))
            .map(|c| c.id);
        let result = match last {
            Some(id) => {
                info!("SessionCore: restoring channel {}", id);
                self.nav.set_by_channel_id(id)
            }
            None => self.nav.select_category(ALL_INDEX),
        };
        if let Err(e) = result {
            debug!("SessionCore: nothing to restore: {}", e);
        }
    }

    // ── Catalog edits ─────────────────────────────────────────────────────────

    fn anchor(&self) -> Anchor {
        let catalog = self.store.catalog();
        Anchor {
            category: catalog
                .category(self.nav.category())
                .map(|c| c.original_name.clone()),
            channel: self
                .nav
                .channel()
                .and_then(|id| catalog.channel(id))
                .map(|c| Slot::of(c)),
        }
    }

    /// Run a store edit, then move the cursor to follow the same category and
    /// channel by identity.
    fn rebuild(
        &mut self,
        edit: impl FnOnce(&mut CatalogStore) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let anchor = self.anchor();
        let result = edit(&mut self.store);
        self.rebase(anchor);
        result
    }

    fn rebase(&mut self, anchor: Anchor) {
        let catalog = self.store.catalog();
        let category = anchor.category.and_then(|name| {
            catalog
                .categories()
                .iter()
                .position(|c| c.original_name == name)
        });
        let channel = anchor
            .channel
            .and_then(|slot| slot.find(catalog))
            .map(|c| c.id);
        self.nav
            .rebase(Layout::from_catalog(catalog), category, channel);
        self.rev += 1;
    }

    // ── Tuning ────────────────────────────────────────────────────────────────

    /// Start a resolve if the cursor moved to a different channel.
    fn sync_tuning(&mut self) {
        if self.stopped {
            return;
        }
        let Some(channel) = self
            .nav
            .channel()
            .and_then(|id| self.store.catalog().channel(id))
            .cloned()
        else {
            return;
        };
        if self.tuned.as_ref() == Some(&Slot::of(&channel)) {
            return;
        }
        self.tune(channel, 0);
    }

    fn tune(&mut self, channel: ChannelRef, source_index: usize) {
        let slot = Slot::of(&channel);
        if let Some(previous) = self.tuned.take().filter(|s| s.key != slot.key) {
            if let Some(previous) = previous.find(self.store.catalog()).cloned() {
                self.set_status(&previous, |s| s.phase = PlaybackPhase::Idle);
            }
        }

        let ticket = self.gate.begin();
        self.tuned = Some(slot);
        self.set_status(&channel, |s| {
            s.phase = PlaybackPhase::Resolving;
            s.error = None;
            s.source_index = source_index;
            s.video_quality = None;
            s.audio_quality = None;
        });
        if let Err(e) = self
            .store
            .prefs_mut()
            .set_last_channel(Some(channel.key.clone()))
        {
            warn!("SessionCore: could not persist last channel: {:#}", e);
        }

        let resolver = Arc::clone(&self.resolver);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let generation = ticket.generation();
            let Some(result) = ticket
                .run(resolver.resolve_source(&channel, source_index))
                .await
            else {
                debug!("SessionCore: resolve #{} cancelled", generation);
                return;
            };
            let _ = tx
                .send(SessionEvent::ResolveFinished {
                    generation,
                    channel: channel.key.clone(),
                    source_index,
                    result,
                })
                .await;
        });
    }

    fn finish_resolve(
        &mut self,
        generation: u64,
        key: ChannelKey,
        source_index: usize,
        result: Result<Resolution, ResolveError>,
    ) {
        if !self.gate.is_current(generation) {
            debug!("SessionCore: dropping stale resolve #{}", generation);
            return;
        }
        let Some(channel) = self.tuned_channel().filter(|c| c.key == key) else {
            debug!("SessionCore: resolved channel {} no longer exists", key);
            return;
        };

        let resolution = match result {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("SessionCore: resolve of {} failed: {}", channel.title, e);
                self.set_status(&channel, |s| {
                    s.phase = PlaybackPhase::Error;
                    s.error = Some(e.to_string());
                });
                return;
            }
        };

        let summary = resolution.issue_summary();
        if let Some(summary) = &summary {
            warn!("SessionCore: {} degraded: {}", channel.title, summary);
        }
        self.set_status(&channel, |s| {
            s.phase = PlaybackPhase::Connecting;
            s.error = summary;
        });

        let stream = ActiveStream {
            generation,
            channel: key,
            source_index,
            descriptor: resolution.descriptor,
        };
        if !self.gate.publish(stream.clone()) {
            return;
        }
        let _ = self.broadcast_tx.send(Broadcast::Stream {
            generation,
            channel_id: channel.id,
            descriptor: stream.descriptor.clone(),
            license: stream.descriptor.drm.as_ref().map(|drm| drm.jwk_license()),
        });

        let audio_track = self.store.audio_track(channel.id);
        if let Err(e) = self.surface.play(&stream, audio_track) {
            self.playback_failed(&channel, source_index, format!("{e:#}"));
        }
    }

    fn handle_playback(&mut self, generation: u64, event: PlaybackEvent) {
        let Some(active) = self.gate.active() else {
            debug!("SessionCore: playback event with nothing playing");
            return;
        };
        if active.generation != generation || !self.gate.is_current(generation) {
            debug!(
                "SessionCore: dropping playback event for stale stream #{}",
                generation
            );
            return;
        }
        let Some(channel) = self.tuned_channel().filter(|c| c.key == active.channel) else {
            return;
        };

        match event {
            PlaybackEvent::Error { message } => {
                self.playback_failed(&channel, active.source_index, message)
            }
            other => self.set_status(&channel, |s| other.apply(s)),
        }
    }

    /// Decoder-reported failure: fail over to the next source or give up and
    /// leave the error on the channel.
    fn playback_failed(&mut self, channel: &ChannelRef, source_index: usize, message: String) {
        let next = source_index + 1;
        if next < channel.sources.len() {
            warn!(
                "SessionCore: {} source {} failed ({}), trying source {}",
                channel.title,
                source_index + 1,
                message,
                next + 1
            );
            self.tune(Arc::clone(channel), next);
            return;
        }
        warn!("SessionCore: {} failed: {}", channel.title, message);
        self.set_status(channel, |s| {
            PlaybackEvent::Error { message }.apply(s);
        });
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.gate.cancel();
        self.gate.clear();
        self.surface.stop();
        if let Some(channel) = self.tuned_channel() {
            self.set_status(&channel, |s| s.phase = PlaybackPhase::Idle);
        }
        self.tuned = None;
    }

    fn tuned_channel(&self) -> Option<ChannelRef> {
        self.tuned
            .as_ref()
            .and_then(|slot| slot.find(self.store.catalog()))
            .cloned()
    }

    // ── Publishing ────────────────────────────────────────────────────────────

    fn set_status(&self, channel: &ChannelRef, f: impl FnOnce(&mut ChannelStatus)) {
        if channel.status.update(f) {
            let _ = self.broadcast_tx.send(Broadcast::Status {
                channel_id: channel.id,
                status: channel.status.get(),
            });
        }
    }

    fn state_rev(&self) -> u64 {
        self.rev + self.nav.rev()
    }

    fn snapshot(&self) -> SessionState {
        let mut state = SessionState::build(self.store.catalog(), self.nav.cursor(), self.state_rev());
        state.progress = *self.progress_tx.borrow();
        state.catalog_location = self.store.location().map(str::to_string);
        state.skipped_entries = self.store.skipped();
        state
    }

    fn broadcast_state(&mut self) {
        self.last_published_rev = self.state_rev();
        let _ = self.broadcast_tx.send(Broadcast::State {
            data: self.snapshot(),
        });
    }
}

#[cfg(test)]
impl SessionCore {
    fn store(&self) -> &CatalogStore {
        &self.store
    }

    fn nav(&self) -> &Navigation {
        &self.nav
    }

    fn resolve_generation(&self) -> u64 {
        self.gate.generation()
    }
}
