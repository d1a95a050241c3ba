#![cfg_attr(docsrs, feature(doc_cfg))]
//! # sokbms_lib
//!
//! This crate provides a library for reading telemetry from SOK batteries
//! over Bluetooth Low Energy. The battery speaks a small vendor-specific
//! request/response protocol over one GATT characteristic pair; this crate
//! implements the command sequencing, the frame decoding and the derived
//! metrics, on top of an injected BLE transport.
//!
//! ## Features
//!
//! This crate uses a feature-based system to keep dependencies minimal.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling
//!   the `sokbms` command-line tool and pulls in `bluest-async` and `serde`.
//!
//! ### Transport Features
//! - `bluest-async`: Enables the production BLE transport using the `bluest`
//!   crate. Without it the library still builds; callers supply their own
//!   [`transport::BleTransport`] implementation.
//!
//! ### Utility Features
//! - `protocol_serde`: Enables `serde` support for the telemetry data
//!   structures.
//! - `bin-dependencies`: Enables all features required by the `sokbms`
//!   binary executable.
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
//! println!("Voltage: {:.2} V, SOC: {} %", telemetry.voltage, telemetry.soc);
//! # Ok(())
//! # }
//! ```

/// Contains error types for the protocol layer.
mod error;
/// Defines the communication protocol for SOK batteries.
pub mod protocol;

/// The BLE transport capability consumed by the client.
pub mod transport;

/// Polling client combining connection lifecycle and command sequencing.
pub mod client;

pub use client::SokBms;
pub use error::Error;

/// Production BLE transport backed by the `bluest` crate.
#[cfg_attr(docsrs, doc(cfg(feature = "bluest-async")))]
#[cfg(feature = "bluest-async")]
pub mod bluest_async;
