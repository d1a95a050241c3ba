//! Polling client for SOK batteries.
//!
//! [`SokBms`] owns an injected [`BleTransport`] and runs the fixed
//! command/response cycle against it: open a session (with a bounded number
//! of connection attempts), perform the four write/read exchanges in order,
//! release the session, then decode. Only a fully successful cycle replaces
//! the held telemetry state.

use crate::protocol::{
    CapacityCycles, CellVoltages, Command, DerivedMetrics, Info, ResponseSet, Telemetry,
    Temperature,
};
use crate::transport::{BleSession, BleTransport, TransportError};
use std::time::Duration;

/// Errors surfaced by a polling cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection attempt budget was exhausted.
    #[error("connection failed after {attempts} attempts: {source}")]
    Connection {
        attempts: u32,
        source: TransportError,
    },
    /// A write or read failed mid-sequence; never retried within a cycle.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// A response buffer failed to decode or a frame was missing.
    #[error("protocol error: {0}")]
    Protocol(#[from] crate::Error),
}

/// A specialized `Result` type for polling operations.
type Result<T> = std::result::Result<T, Error>;

/// Default number of connection attempts per polling cycle.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
/// Default fixed delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// The four exchanges of one polling cycle, in wire order.
///
/// Responses carry no usable identifier at this layer, so each read is
/// tagged with the frame id its position implies.
const EXCHANGES: [(Command, u16); 4] = [
    (Command::ReadPrimary, Info::FRAME_ID),
    (Command::ReadPrimary, Temperature::FRAME_ID),
    (Command::ReadSecondary, CapacityCycles::FRAME_ID),
    (Command::ReadSecondary, CellVoltages::FRAME_ID),
];

/// Client holding the most recent telemetry for one battery.
///
/// One polling cycle at a time per value; `&mut self` on [`SokBms::update`]
/// enforces the serialization the GATT exchange requires.
pub struct SokBms<T: BleTransport> {
    transport: T,
    connect_attempts: u32,
    retry_delay: Duration,
    telemetry: Option<Telemetry>,
    derived: Option<DerivedMetrics>,
    num_samples: u64,
}

impl<T: BleTransport> SokBms<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            telemetry: None,
            derived: None,
            num_samples: 0,
        }
    }

    /// Sets the number of connection attempts per polling cycle (minimum 1).
    pub fn set_connect_attempts(&mut self, attempts: u32) {
        self.connect_attempts = attempts.max(1);
    }

    /// Sets the fixed delay between connection attempts.
    pub fn set_retry_delay(&mut self, delay: Duration) {
        self.retry_delay = delay;
    }

    /// The snapshot of the last successful cycle, if any.
    pub fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_ref()
    }

    /// Metrics derived from the last successful cycle, if any.
    pub fn derived(&self) -> Option<&DerivedMetrics> {
        self.derived.as_ref()
    }

    /// Number of successful polling cycles so far.
    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    /// Run one polling cycle and return the fresh snapshot.
    ///
    /// The session is released on every exit path. On failure the previously
    /// held telemetry, derived metrics and sample counter are untouched; on
    /// success all three are replaced together.
    pub async fn update(&mut self) -> Result<&Telemetry> {
        let mut session = self.open_session().await?;
        let exchange = Self::run_sequence(&mut session).await;
        session.disconnect().await;
        let responses = exchange?;

        let telemetry = Telemetry::aggregate(&responses)?;
        self.derived = Some(DerivedMetrics::from_telemetry(&telemetry));
        self.num_samples += 1;
        Ok(self.telemetry.insert(telemetry))
    }

    /// Connect and discover, retrying up to the configured attempt budget
    /// with a fixed delay between attempts.
    async fn open_session(&mut self) -> Result<T::Session> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_open().await {
                Ok(session) => return Ok(session),
                Err(err) if attempt < self.connect_attempts => {
                    log::debug!(
                        "Connection attempt {}/{} failed: {}",
                        attempt,
                        self.connect_attempts,
                        err
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    return Err(Error::Connection {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    /// One connection attempt. A session that fails service discovery is
    /// disconnected before the error is reported, so every partially
    /// established link is released exactly once.
    async fn try_open(&mut self) -> std::result::Result<T::Session, TransportError> {
        let mut session = self.transport.connect().await?;
        if let Err(err) = session.discover().await {
            session.disconnect().await;
            return Err(err);
        }
        Ok(session)
    }

    /// The fixed half-duplex exchange: each read completes before the next
    /// write is issued. Transport errors propagate unchanged.
    async fn run_sequence(
        session: &mut T::Session,
    ) -> std::result::Result<ResponseSet, TransportError> {
        let mut responses = ResponseSet::default();
        for (command, frame) in EXCHANGES {
            log::trace!("Send {:?}", command);
            session.write_command(&command.request()).await?;
            let data = session.read_response().await?;
            log::debug!("Recv frame 0x{:04X}: {:02X?}", frame, data);
            responses.insert(frame, data);
        }
        Ok(responses)
    }
}
