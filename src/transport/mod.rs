//! Transport layer for the SMB client.
//!
//! The engine drives a boxed [`SmbTransport`] synchronously from whichever
//! call is currently waiting on the wire; there is no background task. The
//! TCP implementation lives in [`tcp`]; tests drive the engine through an
//! in-memory transport.

use crate::error::Result;
use async_trait::async_trait;
use bytes::BytesMut;

pub mod tcp;

#[cfg(test)]
pub mod mock;

/// Byte-stream transport to one SMB endpoint.
///
/// A transport knows its own endpoint so the connection can re-dial it
/// during reconnect without carrying address state itself.
#[async_trait]
pub trait SmbTransport: Send {
    /// Establish (or re-establish) the stream to the configured endpoint.
    async fn connect(&mut self) -> Result<()>;

    /// Write a full buffer to the stream.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever bytes are available, blocking until at least one
    /// arrives or the stream fails.
    async fn receive(&mut self) -> Result<BytesMut>;

    /// Whether the stream is currently established.
    fn is_connected(&self) -> bool;

    /// Tear the stream down, swallowing errors. Safe to call repeatedly.
    async fn abort(&mut self);
}
