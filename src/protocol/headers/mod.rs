//! Parsing and serialization of TCP headers.

mod tcp;
pub use tcp::{OptionKind, OptionsIter, TcpHeader, TcpOption, TcpOptions};
