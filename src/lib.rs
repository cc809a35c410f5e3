//! linewise: line-oriented TCP request/response server and client
//!
//! Every connection runs one exchange kind:
//! - Echo/chat: each line is answered with `<prefix>:<line>`
//! - Compute: two integers in, their squares out, then close
//!
//! Features:
//! - One task per connection, capped by a connection semaphore
//! - Per-read/per-write deadlines so idle peers cannot hold a session
//! - Graceful drain on shutdown
//! - Configuration via CLI arguments, `PORT`, or TOML file

pub mod client;
pub mod config;
pub mod error;
pub mod framer;
pub mod protocols;
pub mod server;
pub mod session;

pub use client::Client;
pub use config::{Config, Endpoint, SessionConfig};
pub use error::{ClientError, ServerError, SessionError};
pub use framer::LineFramer;
pub use protocols::Protocol;
pub use server::{serve, Server};
pub use session::{Session, SessionState};
