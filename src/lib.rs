//! A minimal client-side implementation of the Transmission Control Protocol
//! (TCP), based on [RFC 793], for fetching data over the network at boot time.
//!
//! Single threaded and polling based: blocking operations pump the
//! [Transport](protocol::Transport) for inbound datagrams until they complete
//! or time out.
//!
//! [RFC 793]: https://www.rfc-editor.org/rfc/rfc793

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod log;

pub mod config;
pub use config::Config;

pub mod protocol;

pub mod error;
pub use error::{Error, ParseError, Result};
