//! Logd TCP server.
//!
//! The [`Socket`] listener accepts line-protocol connections, stamps each
//! with a connection id, and pushes parsed requests through a
//! [`logd_events::RequestHandler`]. Responses are written back as status
//! lines; streaming reads are drained to the socket until `+EOF` or the
//! connection goes away.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]

mod socket;

pub use socket::Socket;
