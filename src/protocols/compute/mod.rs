//! Compute protocol implementation.
//!
//! A single-shot exchange:
//! - Client sends two lines, each a signed decimal integer
//! - Server responds with one line per operand, then closes
//!
//! Operands are `i64` and squares are computed as `i128`, so every operand
//! the wire can carry squares without overflow.
//!
//! When `skip_preamble` is set the server first discards one free-form line,
//! for clients that open with a message before the numbers.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  4\n7\n
//! Response: Square of 4: 16\nSquare of 7: 49\n
//! ```
//!
//! A line that is not an integer ends the session with no response at all.

pub mod handler;
pub mod parser;

pub use handler::handle_session;
