//! In-memory transport for exercising the engine against a scripted
//! server.
//!
//! The fake server consumes one framed request at a time and returns zero
//! or more framed responses; an empty inbox surfaces as a read timeout,
//! which is exactly what a silent server looks like to the engine.

use super::SmbTransport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Server side of a mock exchange. `handle` receives one frame payload
/// (length prefix stripped) and returns response payloads; `on_connect`
/// runs on every (re)connect so per-stream state can reset while durable
/// state survives.
pub trait MockServer: Send {
    fn handle(&mut self, frame: Vec<u8>) -> Vec<Vec<u8>>;
    fn on_connect(&mut self) {}
}

/// Shared switch that makes the transport fail like a dead stream.
#[derive(Debug, Clone, Default)]
pub struct FaultSwitch(Arc<AtomicBool>);

impl FaultSwitch {
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct MockTransport<S: MockServer> {
    server: Arc<Mutex<S>>,
    inbox: BytesMut,
    connected: bool,
    fault: FaultSwitch,
    connect_count: Arc<Mutex<usize>>,
}

impl<S: MockServer> MockTransport<S> {
    pub fn new(server: Arc<Mutex<S>>) -> Self {
        Self {
            server,
            inbox: BytesMut::new(),
            connected: false,
            fault: FaultSwitch::default(),
            connect_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Handle for tripping a simulated transport failure after the
    /// transport has been moved into a connection.
    pub fn fault_switch(&self) -> FaultSwitch {
        self.fault.clone()
    }

    /// Shared connect counter, observable the same way.
    pub fn connect_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.connect_count)
    }
}

#[async_trait]
impl<S: MockServer> SmbTransport for MockTransport<S> {
    async fn connect(&mut self) -> Result<()> {
        self.fault.reset();
        self.inbox.clear();
        self.connected = true;
        *self.connect_count.lock().unwrap() += 1;
        self.server.lock().unwrap().on_connect();
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::ConnectionClosed);
        }
        if self.fault.is_tripped() {
            self.connected = false;
            return Err(Error::ConnectionClosed);
        }
        // Split complete frames out of the written bytes and feed each to
        // the server; the engine always writes whole frames.
        let mut written = BytesMut::from(data);
        while let Some(frame) = crate::protocol::frame::split_frame(&mut written)? {
            let responses = self.server.lock().unwrap().handle(frame);
            for response in responses {
                self.inbox
                    .put_slice(&crate::protocol::frame::encode_frame(&response)?);
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<BytesMut> {
        if !self.connected {
            return Err(Error::ConnectionClosed);
        }
        if self.fault.is_tripped() {
            self.connected = false;
            return Err(Error::ConnectionClosed);
        }
        if self.inbox.is_empty() {
            // Nothing scripted: behave like a server that never answers
            return Err(Error::Timeout);
        }
        Ok(self.inbox.split())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn abort(&mut self) {
        self.connected = false;
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame;

    struct Upper;

    impl MockServer for Upper {
        fn handle(&mut self, frame: Vec<u8>) -> Vec<Vec<u8>> {
            vec![frame.to_ascii_uppercase()]
        }
    }

    #[tokio::test]
    async fn test_mock_exchange() {
        let server = Arc::new(Mutex::new(Upper));
        let mut transport = MockTransport::new(server);
        transport.connect().await.unwrap();

        transport
            .send(&frame::encode_frame(b"hello").unwrap())
            .await
            .unwrap();
        let mut received = transport.receive().await.unwrap();
        let response = frame::split_frame(&mut received).unwrap().unwrap();
        assert_eq!(response, b"HELLO");
    }

    #[tokio::test]
    async fn test_fault_switch_kills_stream() {
        let server = Arc::new(Mutex::new(Upper));
        let mut transport = MockTransport::new(server);
        let fault = transport.fault_switch();
        transport.connect().await.unwrap();

        fault.trip();
        assert!(matches!(
            transport.receive().await,
            Err(Error::ConnectionClosed)
        ));
        assert!(!transport.is_connected());

        // Reconnect clears the fault
        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        assert!(!fault.is_tripped());
    }

    #[tokio::test]
    async fn test_empty_inbox_is_timeout() {
        struct Silent;
        impl MockServer for Silent {
            fn handle(&mut self, _frame: Vec<u8>) -> Vec<Vec<u8>> {
                Vec::new()
            }
        }
        let mut transport = MockTransport::new(Arc::new(Mutex::new(Silent)));
        transport.connect().await.unwrap();
        transport
            .send(&frame::encode_frame(b"anyone?").unwrap())
            .await
            .unwrap();
        assert!(matches!(transport.receive().await, Err(Error::Timeout)));
    }
}
