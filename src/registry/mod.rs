//! Connection and subscription registries
//!
//! One streaming connection per origin is shared by every channel
//! subscription on that origin, and each subscription is shared by every
//! consumer attached to it.
//!
//! # Architecture
//!
//! ```text
//!                      SubscriptionRegistry
//!              ┌──────────────────────────────────┐
//!              │ origins: HashMap<Origin,         │
//!              │   OriginEntry {                  │
//!              │     channels: RefSet<Channel,    │
//!              │       subscription, Router>      │──► StreamRegistry
//!              │   }                              │    (one Connection
//!              │ >                                │     per origin)
//!              └────────────────┬─────────────────┘
//!                               │
//!        Connection ──► EventSink ──► Router
//!                                       │
//!               ┌───────────────────────┼───────────────────────┐
//!               ▼                       ▼                       ▼
//!          [Consumer 1]            [Consumer 2]            [Consumer 3]
//!          on_note(note)           on_note(note)           on_note(note)
//! ```
//!
//! # Teardown
//!
//! The consumer set of a subscription and the channel set of an origin are
//! both [`RefSet`]s. When a consumer set drains the subscription is disposed;
//! when an origin's channel set drains its connection is closed.

pub mod config;
mod entry;
pub mod key;
pub mod refset;
pub mod router;
pub mod store;
pub mod stream;

pub use config::RegistryConfig;
pub use key::{ChannelKey, ConsumerId, Origin};
pub use refset::{Attached, RefSet};
pub use router::{EventSink, NoteHandler};
pub use store::SubscriptionRegistry;
pub use stream::StreamRegistry;
