mod chat;
mod connection;
mod context;
mod controller;
mod dispatch;
mod election;
mod peer;
mod registry;
pub mod sink;
pub mod shutdown;

mod control;

pub use context::{NetworkState, PeerContext};
pub use control::ControlSurface;
pub use peer::Peer;
pub use sink::{EventSink, TracingSink};

#[cfg(any(test, feature = "test-util"))]
pub use sink::recording::RecordingSink;
