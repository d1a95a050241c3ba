//! Provides a BLE transport for SOK batteries backed by the `bluest` crate.
//!
//! The battery exposes a Nordic-UART style vendor service with one writable
//! command characteristic and one readable response characteristic. This
//! module discovers the device by its advertised name, and implements the
//! [`BleTransport`]/[`BleSession`] pair on top of the platform BLE stack.
//!
//! # Example
//!
//! ```no_run
//! use sokbms_lib::bluest_async::BluestTransport;
//! use sokbms_lib::SokBms;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let transport = BluestTransport::new("SOK-AA12345").await?;
//! let mut bms = SokBms::new(transport);
//! let telemetry = bms.update().await?;
//! println!("{telemetry:?}");
//! # Ok(())
//! # }
//! ```

use crate::transport::{BleSession, BleTransport, TransportError};
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::timeout;

const VENDOR_SERVICE_ID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";
const RESPONSE_CHARACTERISTIC_ID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";
const COMMAND_CHARACTERISTIC_ID: &str = "0000ffe2-0000-1000-8000-00805f9b34fb";

/// How long to scan for the advertised device name before giving up.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for individual characteristic operations.
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

fn vendor_service_id() -> Uuid {
    Uuid::parse_str(VENDOR_SERVICE_ID).unwrap()
}

fn response_characteristic_id() -> Uuid {
    Uuid::parse_str(RESPONSE_CHARACTERISTIC_ID).unwrap()
}

fn command_characteristic_id() -> Uuid {
    Uuid::parse_str(COMMAND_CHARACTERISTIC_ID).unwrap()
}

/// [`BleTransport`] implementation over the platform BLE stack.
pub struct BluestTransport {
    adapter: Adapter,
    device: Device,
    io_timeout: Duration,
}

impl BluestTransport {
    /// Locate the battery by its advertised BLE name and prepare a transport
    /// for it. Scanning filters on the vendor service so unrelated
    /// advertisements are skipped cheaply.
    pub async fn new(device_name: &str) -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| TransportError::Connect("default adapter not found".into()))?;
        adapter
            .wait_available()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let device = timeout(
            DISCOVERY_TIMEOUT,
            Self::discover_device(device_name, &adapter),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        Ok(Self {
            adapter,
            device,
            io_timeout: DEFAULT_IO_TIMEOUT,
        })
    }

    /// Sets the timeout for individual characteristic operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        log::trace!("set timeout to {:?}", timeout);
        self.io_timeout = timeout;
    }

    async fn discover_device(name: &str, adapter: &Adapter) -> Result<Device, TransportError> {
        let required_services = [vendor_service_id()];
        let mut scan = adapter
            .scan(&required_services)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        while let Some(discovered) = scan.next().await {
            let device_name = discovered.device.name_async().await.unwrap_or_default();
            log::trace!("Advertisement from '{}'", device_name);
            if device_name == name {
                return Ok(discovered.device);
            }
        }
        Err(TransportError::Connect(format!(
            "device '{}' not found",
            name
        )))
    }
}

#[async_trait]
impl BleTransport for BluestTransport {
    type Session = BluestSession;

    async fn connect(&mut self) -> Result<BluestSession, TransportError> {
        log::debug!("Connecting to {:?}", self.device);
        self.adapter
            .connect_device(&self.device)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(BluestSession {
            adapter: self.adapter.clone(),
            device: self.device.clone(),
            command: None,
            response: None,
            io_timeout: self.io_timeout,
            released: false,
        })
    }
}

/// One open GATT session against the battery.
pub struct BluestSession {
    adapter: Adapter,
    device: Device,
    command: Option<Characteristic>,
    response: Option<Characteristic>,
    io_timeout: Duration,
    released: bool,
}

impl BluestSession {
    async fn resolve_characteristic(
        service: &bluest::Service,
        id: Uuid,
    ) -> Result<Characteristic, TransportError> {
        Ok(service
            .discover_characteristics_with_uuid(id)
            .await
            .map_err(|err| TransportError::Discovery(err.to_string()))?
            .first()
            .ok_or_else(|| TransportError::Discovery(format!("characteristic {} not found", id)))?
            .clone())
    }
}

#[async_trait]
impl BleSession for BluestSession {
    async fn discover(&mut self) -> Result<(), TransportError> {
        let service = timeout(
            self.io_timeout,
            self.device.discover_services_with_uuid(vendor_service_id()),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|err| TransportError::Discovery(err.to_string()))?
        .first()
        .ok_or_else(|| TransportError::Discovery("vendor service not present".into()))?
        .clone();

        let command = Self::resolve_characteristic(&service, command_characteristic_id()).await?;
        let response = Self::resolve_characteristic(&service, response_characteristic_id()).await?;
        self.command = Some(command);
        self.response = Some(response);
        Ok(())
    }

    async fn write_command(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let characteristic = self
            .command
            .as_ref()
            .ok_or_else(|| TransportError::Write("characteristics not discovered".into()))?;
        timeout(self.io_timeout, characteristic.write(payload))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|err| TransportError::Write(err.to_string()))
    }

    async fn read_response(&mut self) -> Result<Vec<u8>, TransportError> {
        let characteristic = self
            .response
            .as_ref()
            .ok_or_else(|| TransportError::Read("characteristics not discovered".into()))?;
        timeout(self.io_timeout, characteristic.read())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|err| TransportError::Read(err.to_string()))
    }

    async fn disconnect(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.adapter.disconnect_device(&self.device).await {
            log::warn!("Best-effort disconnect failed: {}", err);
        } else {
            log::debug!("Disconnected from {:?}", self.device);
        }
    }
}
