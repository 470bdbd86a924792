//! Two-level navigation cursor (category, channel) over a built catalog.
//!
//! Both values are published through `tokio::sync::watch`, so subscribers
//! see at most one change per mutating call and a late subscriber simply
//! reads the current value.  Every mutator is a no-op when its target is
//! already current.
//!
//! Invariant: `channel` is either `None` or a member of `category`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::catalog::Catalog;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavError {
    #[error("no category at index {0}")]
    CategoryOutOfRange(usize),
    #[error("no channel with id {0}")]
    ChannelOutOfRange(usize),
}

/// Snapshot of both cursor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Cursor {
    pub category: usize,
    pub channel: Option<usize>,
}

/// Category membership as navigation sees it.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    /// Member channel ids per category, in category order.
    pub membership: Vec<Vec<usize>>,
    /// Organic category each channel was parsed into, indexed by channel id.
    pub home: Vec<Option<usize>>,
}

impl Layout {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self {
            membership: catalog.membership(),
            home: (0..catalog.len())
                .map(|id| catalog.home_category(id))
                .collect(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.home.len()
    }

    fn is_member(&self, category: usize, channel: usize) -> bool {
        self.membership
            .get(category)
            .is_some_and(|members| members.contains(&channel))
    }
}

/// Mutation requested from outside the dispatching code path.  Queued and
/// applied by `Navigation::drain_requests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavRequest {
    SelectCategory(usize),
    SelectChannel(usize),
    Next,
    Previous,
    Random,
}

pub type NavRequester = mpsc::UnboundedSender<NavRequest>;

pub struct Navigation {
    layout: Layout,
    reversed: bool,
    state: Cursor,
    batching: usize,
    rev: u64,
    category_tx: watch::Sender<usize>,
    channel_tx: watch::Sender<Option<usize>>,
    request_tx: NavRequester,
    request_rx: mpsc::UnboundedReceiver<NavRequest>,
}

impl Navigation {
    pub fn new(reversed: bool) -> Self {
        let state = Cursor::default();
        let (category_tx, _) = watch::channel(state.category);
        let (channel_tx, _) = watch::channel(state.channel);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        Self {
            layout: Layout::default(),
            reversed,
            state,
            batching: 0,
            rev: 0,
            category_tx,
            channel_tx,
            request_tx,
            request_rx,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.state
    }

    pub fn category(&self) -> usize {
        self.state.category
    }

    pub fn channel(&self) -> Option<usize> {
        self.state.channel
    }

    /// Bumped once per published change.
    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn set_reversed(&mut self, reversed: bool) {
        self.reversed = reversed;
    }

    pub fn subscribe_category(&self) -> watch::Receiver<usize> {
        self.category_tx.subscribe()
    }

    pub fn subscribe_channel(&self) -> watch::Receiver<Option<usize>> {
        self.channel_tx.subscribe()
    }

    /// Sender for deferred mutation requests.
    pub fn requester(&self) -> NavRequester {
        self.request_tx.clone()
    }

    /// Install a freshly built layout.  The category index is taken from
    /// `category_hint` (or kept), and the channel from `channel_hint` when it
    /// is still a member; otherwise the cursor falls back to the category's
    /// first member.
    pub fn rebase(
        &mut self,
        layout: Layout,
        category_hint: Option<usize>,
        channel_hint: Option<usize>,
    ) {
        self.layout = layout;
        let last = self.layout.membership.len().saturating_sub(1);
        let category = category_hint.unwrap_or(self.state.category).min(last);
        self.state.category = category;
        self.state.channel = self.derive_channel(category, channel_hint);
        self.publish();
    }

    /// Select a category.  The channel becomes the current one if it is a
    /// member, otherwise the first member (or nothing for an empty category).
    pub fn select_category(&mut self, index: usize) -> Result<bool, NavError> {
        if index >= self.layout.membership.len() {
            return Err(NavError::CategoryOutOfRange(index));
        }
        if index == self.state.category {
            return Ok(false);
        }
        self.state.category = index;
        self.state.channel = self.derive_channel(index, self.state.channel);
        Ok(self.publish())
    }

    /// Select a channel by its global ("All") index.  When the channel is not
    /// in the selected category, the category follows to its home category.
    pub fn select_channel_global(&mut self, index: usize) -> Result<bool, NavError> {
        if index >= self.layout.channel_count() {
            return Err(NavError::ChannelOutOfRange(index));
        }
        if self.state.channel == Some(index) {
            return Ok(false);
        }
        self.tune(index);
        Ok(self.publish())
    }

    /// Jump to a channel by id, always switching to its home category.  Used
    /// when restoring a session or jumping from a search result.
    pub fn set_by_channel_id(&mut self, id: usize) -> Result<bool, NavError> {
        if id >= self.layout.channel_count() {
            return Err(NavError::ChannelOutOfRange(id));
        }
        let home = self.home_or_current(id);
        if self.state.channel == Some(id) && self.state.category == home {
            return Ok(false);
        }
        self.state.category = home;
        self.state.channel = Some(id);
        Ok(self.publish())
    }

    /// Step forward over "All", wrapping.  Returns `None` when there are no
    /// channels.
    pub fn next(&mut self) -> Option<usize> {
        self.step(!self.reversed)
    }

    pub fn previous(&mut self) -> Option<usize> {
        self.step(self.reversed)
    }

    /// Tune a uniformly random channel other than the current one.
    pub fn random(&mut self) -> Option<usize> {
        let count = self.layout.channel_count();
        if count == 0 {
            return None;
        }
        let target = match self.state.channel {
            Some(current) if count > 1 => {
                let pick = rand::thread_rng().gen_range(0..count - 1);
                if pick >= current {
                    pick + 1
                } else {
                    pick
                }
            }
            Some(current) => current,
            None => rand::thread_rng().gen_range(0..count),
        };
        self.tune(target);
        self.publish();
        Some(target)
    }

    /// Apply several mutations and publish once at the end.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.batching += 1;
        let out = f(self);
        self.batching -= 1;
        self.publish();
        out
    }

    /// Apply every queued request in order, as one batch.  Returns how many
    /// were applied.
    pub fn drain_requests(&mut self) -> usize {
        let mut queued = Vec::new();
        while let Ok(request) = self.request_rx.try_recv() {
            queued.push(request);
        }
        if queued.is_empty() {
            return 0;
        }
        let count = queued.len();
        self.batch(|nav| {
            for request in queued {
                nav.apply(request);
            }
        });
        count
    }

    pub fn apply(&mut self, request: NavRequest) {
        debug!("navigation: {:?}", request);
        let result = match request {
            NavRequest::SelectCategory(i) => self.select_category(i).map(|_| ()),
            NavRequest::SelectChannel(i) => self.select_channel_global(i).map(|_| ()),
            NavRequest::Next => {
                self.next();
                Ok(())
            }
            NavRequest::Previous => {
                self.previous();
                Ok(())
            }
            NavRequest::Random => {
                self.random();
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!("navigation: ignoring request: {}", e);
        }
    }

    fn step(&mut self, forward: bool) -> Option<usize> {
        let count = self.layout.channel_count();
        if count == 0 {
            debug!("navigation: no channel to step to");
            return None;
        }
        let target = match (self.state.channel, forward) {
            (Some(current), true) => (current + 1) % count,
            (Some(current), false) => (current + count - 1) % count,
            (None, true) => 0,
            (None, false) => count - 1,
        };
        self.tune(target);
        self.publish();
        Some(target)
    }

    fn tune(&mut self, id: usize) {
        if !self.layout.is_member(self.state.category, id) {
            self.state.category = self.home_or_current(id);
        }
        self.state.channel = Some(id);
    }

    fn home_or_current(&self, id: usize) -> usize {
        self.layout
            .home
            .get(id)
            .copied()
            .flatten()
            .unwrap_or(self.state.category)
    }

    fn derive_channel(&self, category: usize, preferred: Option<usize>) -> Option<usize> {
        let members = self.layout.membership.get(category)?;
        match preferred {
            Some(id) if members.contains(&id) => Some(id),
            _ => members.first().copied(),
        }
    }

    /// Push the working cursor to subscribers.  Returns true when anything
    /// changed.
    fn publish(&mut self) -> bool {
        if self.batching > 0 {
            return false;
        }
        let category = self.state.category;
        let channel = self.state.channel;
        let category_changed = self.category_tx.send_if_modified(|v| {
            let changed = *v != category;
            *v = category;
            changed
        });
        let channel_changed = self.channel_tx.send_if_modified(|v| {
            let changed = *v != channel;
            *v = channel;
            changed
        });
        let changed = category_changed || channel_changed;
        if changed {
            self.rev += 1;
        }
        changed
    }
}
