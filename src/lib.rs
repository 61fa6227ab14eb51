//! Client-side SMB2/3 protocol engine.
//!
//! Implements the wire codec (framing, header validation, message signing),
//! SPNEGO-wrapped NTLMv2 authentication, the connection/session/tree
//! lifecycle with caller-driven reconnection, and a directory-listing cache
//! layered on the server's forward-scan enumeration protocol.
//!
//! The host filesystem adapter, address discovery and UI layers live in the
//! surrounding product; this crate only exposes the protocol surface they
//! consume.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{Connection, SessionHandle, TreeHandle};
pub use error::{Error, Result};
