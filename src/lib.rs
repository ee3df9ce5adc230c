//! Connection multiplexer for Misskey streaming timelines
//!
//! Editor buffers showing live timelines attach to a
//! [`SubscriptionRegistry`](registry::SubscriptionRegistry). The registry
//! keeps one streaming connection per server and one channel subscription
//! per (server, channel), shares both across every attached buffer, and
//! tears them down when the last buffer detaches.
//!
//! The wire protocol is supplied by a [`Transport`](transport::Transport)
//! implementation; [`LoopbackTransport`](transport::LoopbackTransport) keeps
//! everything in memory.
//!
//! # Example
//! ```no_run
//! use misskey_stream::channel::Channel;
//! use misskey_stream::config::FileCredentials;
//! use misskey_stream::registry::{ConsumerId, Origin, SubscriptionRegistry};
//! use misskey_stream::render::render;
//! use misskey_stream::transport::LoopbackTransport;
//!
//! # async fn example() -> misskey_stream::error::Result<()> {
//! let credentials = FileCredentials::from_default_location()?;
//! let registry = SubscriptionRegistry::new(credentials, LoopbackTransport::new());
//! let origin = Origin::new("misskey.io");
//!
//! registry
//!     .attach(&origin, Channel::LocalTimeline, ConsumerId(1), |note| {
//!         for line in render(&note, "") {
//!             println!("{}", line);
//!         }
//!     })
//!     .await?;
//!
//! registry.detach(&origin, Channel::LocalTimeline, ConsumerId(1)).await;
//! # Ok(())
//! # }
//! ```

pub mod bufname;
pub mod channel;
pub mod config;
pub mod error;
pub mod note;
pub mod registry;
pub mod render;
pub mod submit;
pub mod transport;

pub use bufname::BufferName;
pub use channel::{Channel, Timeline};
pub use error::{Error, Result};
pub use note::{Note, NoteDraft, User, Visibility};
pub use registry::{ChannelKey, ConsumerId, Origin, SubscriptionRegistry};
pub use render::render;
pub use submit::NoteSubmitter;
