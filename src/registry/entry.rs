//! Per-origin subscription state

use std::sync::Arc;

use crate::channel::Channel;
use crate::transport::Subscription;

use super::refset::RefSet;
use super::router::Router;

/// An active channel: its transport subscription plus the router holding
/// the consumer set
pub(super) struct ChannelEntry {
    pub(super) subscription: Box<dyn Subscription>,
    pub(super) router: Arc<Router>,
}

/// Subscription state for one origin
///
/// The origin's connection is held open exactly while `channels` is
/// non-empty. Once drained, the entry is retired and dropped from the
/// registry; a caller still holding a retired entry must look it up again.
#[derive(Default)]
pub(super) struct OriginEntry {
    pub(super) channels: RefSet<Channel, ChannelEntry>,
    pub(super) retired: bool,
}

impl OriginEntry {
    pub(super) fn active_channels(&self) -> Vec<Channel> {
        self.channels.keys().copied().collect()
    }
}
