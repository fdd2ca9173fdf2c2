//! habibot — persistent client for the Elko virtual-world protocol.
//!
//! A bot holds one long-lived TCP connection to an Elko server, learns
//! object references from the continuous feed of creation and state
//! notifications, and issues commands that manipulate a single controlled
//! avatar. Commands are strictly serialized (the server cannot handle
//! concurrent requests) and may use `$`-path templates resolved against
//! observed session state.

// Error documentation is deferred - the errors are self-explanatory from types
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod client;
pub mod dispatch;
pub mod frame;
pub mod message;
pub mod recovery;
pub mod session;
pub mod template;
pub mod testing;

pub use cli::Cli;
pub use client::{ConnectError, EventKind, HabiBot, HandlerError};
pub use dispatch::{DEFAULT_SEND_DELAY, PendingSend, SendError};
pub use frame::FrameDecoder;
pub use message::Message;
pub use recovery::{EmbodimentState, RecoveryError};
pub use session::{ScanOutcome, Session};
pub use testing::FakeElkoServer;
