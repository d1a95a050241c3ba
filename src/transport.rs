//! BLE transport capability consumed by the client.
//!
//! The client never talks to a BLE stack directly; it drives one of these
//! traits. Production code injects [`crate::bluest_async::BluestTransport`],
//! tests inject a scripted mock.

use async_trait::async_trait;

/// Errors raised by a transport backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Establishing the BLE link failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// GATT service enumeration or characteristic resolution failed.
    #[error("service discovery failed: {0}")]
    Discovery(String),
    /// A characteristic write failed.
    #[error("characteristic write failed: {0}")]
    Write(String),
    /// A characteristic read failed.
    #[error("characteristic read failed: {0}")]
    Read(String),
    /// An I/O operation exceeded the configured timeout.
    #[error("transport operation timed out")]
    Timeout,
}

/// A BLE link able to open GATT sessions to one device.
#[async_trait]
pub trait BleTransport: Send {
    type Session: BleSession;

    /// Establish the connection and hand back a session.
    ///
    /// The session is not usable until [`BleSession::discover`] has resolved
    /// the command and response characteristics.
    async fn connect(&mut self) -> Result<Self::Session, TransportError>;
}

/// One open GATT session.
#[async_trait]
pub trait BleSession: Send {
    /// Enumerate GATT services and resolve the command/response characteristics.
    async fn discover(&mut self) -> Result<(), TransportError>;

    /// Write one command buffer to the command characteristic.
    async fn write_command(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Read one response buffer from the response characteristic.
    async fn read_response(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Release the connection.
    ///
    /// Idempotent and best-effort; implementations log failures instead of
    /// returning them.
    async fn disconnect(&mut self);
}
