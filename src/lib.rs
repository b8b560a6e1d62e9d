#![deny(missing_docs)]
//! # lockcenter
//!
//! A client for a remote named-mutex service. Locks live on a server; the
//! client speaks a small binary protocol to it and turns unreliable network
//! calls into blocking `lock`/`unlock` calls.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use lockcenter::{MutexClient, MutexService};
//!
//! let client = MutexClient::connect("127.0.0.1:4000")?;
//! client.lock("session1", Some("10.0.0.5"))?;
//! // critical section
//! client.unlock("session1")?;
//! # Ok::<(), lockcenter::MutexError>(())
//! ```
pub mod protocol;

pub mod thread_pool;

pub mod config;

pub mod connection;

pub mod retry;

pub mod client;

pub mod server;

pub mod error;

pub use crate::client::{MutexClient, MutexService};
pub use crate::config::{ClientConfig, ConnectionMode, Endpoint, ProtocolVersion};
pub use crate::error::{MutexError, Result};
pub use crate::retry::{CancelToken, RetryPolicy};
pub use crate::server::{LockServer, RunningServer, ServerHandle};
