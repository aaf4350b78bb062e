#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown,
    clippy::too_long_first_doc_paragraph
)]

//! immergas_modbus
//!
//! Modbus RTU master for Immergas heating appliances on a shared RS-485 bus.
//!
//! Main features:
//! - RTU frame assembly and validation with CRC-16/MODBUS (0x03 / 0x10)
//! - request/response transactions over a byte-level half-duplex link (`RtuClient`)
//! - a typed PDU table (`pdus.toml`) and float value codec
//! - contiguous read batching and per-device value dispatch (`Controller`)
//! - a simulated slave for tests (separate crate `immergas_modbus_mock`)
//!
//! Quick example:
//! ```no_run
//! use immergas_modbus::controller::Controller;
//! use immergas_modbus::device::{Device, DeviceKind};
//! use immergas_modbus::rtu_client::RtuClient;
//! use immergas_modbus::transport::SerialPortLink;
//!
//! # async fn demo() -> Result<(), immergas_modbus::ModbusError> {
//! immergas_modbus::init_defaults()?;
//! let link = SerialPortLink::open("/dev/ttyUSB0", 9600)?;
//! let mut ctl = Controller::with_global_registry(RtuClient::new(link))?;
//! ctl.register(Device::new(DeviceKind::Sensor, "1", 2000).with_name("flow"));
//! ctl.setup();
//! ctl.update().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod pdu_registry;
pub mod planner;
pub mod request;
pub mod response;
pub mod rtu_client;
pub mod rtu_define;
pub mod rtu_frame;
pub mod transport;
pub mod value_codec;

pub use controller::Controller;
pub use device::{Device, DeviceCommand, DeviceHandle, DeviceKind, DeviceState};
pub use error::ModbusError;
pub use pdu_registry::{PduEntry, PduRegistry, PduType};
pub use rtu_client::RtuClient;
pub use transport::SerialLink;

/// Install the embedded `pdus.toml` table as the global PDU registry.
///
/// Calling this more than once is harmless: an already installed registry is
/// kept and the call succeeds.
///
/// # Errors
///
/// Returns `Err(ModbusError)` when the embedded table fails to parse or
/// validate.
pub fn init_defaults() -> Result<(), ModbusError> {
    if PduRegistry::global().is_some() {
        return Ok(());
    }
    match PduRegistry::embedded()?.set_global() {
        Ok(()) => Ok(()),
        // lost a race with another initializer
        Err(_) if PduRegistry::global().is_some() => Ok(()),
        Err(e) => Err(e),
    }
}
