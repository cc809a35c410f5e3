//! Echo/chat protocol implementation.
//!
//! A free-form line exchange:
//! - Client sends: `<message>\n`
//! - Server responds: `<prefix>:<message>\n`
//!
//! The session keeps answering until the client closes the connection.
//! Each reply is written before the next request is read, so replies come
//! back in the order the requests were sent.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  hello\n
//! Response: Server:hello\n
//!
//! Request:  how are you?\n
//! Response: Server:how are you?\n
//! ```

pub mod handler;

pub use handler::{handle_session, respond};
