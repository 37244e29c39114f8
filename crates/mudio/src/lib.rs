//! `mudio`: byte-level helpers shared by the portal and the server.
//!
//! - `frame`: `u32` big-endian length-prefixed frames for the internal bridge,
//!   written in parts so headers and bodies never get concatenated.
//! - `line`: CR/LF line framing over an incrementally filled buffer.
//! - `telnet`: IAC stripping plus the small amount of option negotiation the
//!   portal cares about (window size and terminal type).

pub mod frame;
pub mod line;
pub mod telnet;
