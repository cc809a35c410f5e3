//! Exchange implementations.
//!
//! Each protocol has a pure response module and a session driver used by
//! the acceptor.
//!
//! - `echo`: free-form chat, every line answered with `<prefix>:<line>`
//! - `compute`: two integers in, their squares out, then close

pub mod compute;
pub mod echo;

use clap::ValueEnum;
use serde::Deserialize;

/// Exchange kind served on every accepted connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Read a line, answer it, repeat until the peer disconnects.
    #[default]
    Echo,
    /// Read two integers, answer with their squares, close.
    Compute,
}
