use std::fmt;

use crate::error::ModbusError;
use crate::rtu_define::is_valid_slave_id;

/// Capability of a registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// Read-only numeric value.
    Sensor,
    /// Read-only on/off value (`value >= 1.0` is on).
    BinarySensor,
    /// Writable numeric value.
    Number,
    /// Writable enumeration; the register holds the index into `options`.
    Select { options: Vec<String> },
    /// Writable on/off value, written as `1.0` / `0.0`.
    Switch,
    /// Climate entity fed with the current temperature.
    Climate,
}

impl DeviceKind {
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        matches!(self, Self::Number | Self::Select { .. } | Self::Switch)
    }
}

/// Last value published by a device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceState {
    Value(f32),
    On(bool),
    Option(String),
}

/// User-originated change requested through a writable device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    SetNumber(f32),
    SetSwitch(bool),
    SelectOption(String),
}

/// Index of a device inside a controller's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub(crate) usize);

impl DeviceHandle {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

pub type StateListener = Box<dyn FnMut(&DeviceState) + Send>;

/// Entity bound to one PDU on one slave.
///
/// `address` is `"<slave>"` or `"<slave>.<sub>"`; only the slave part is used
/// on the bus. A `pdu` of 0 means no parameter is configured.
pub struct Device {
    pub name: String,
    pub address: String,
    pub pdu: u16,
    pub kind: DeviceKind,
    state: Option<DeviceState>,
    listener: Option<StateListener>,
}

impl Device {
    #[must_use]
    pub fn new(kind: DeviceKind, address: impl Into<String>, pdu: u16) -> Self {
        let address = address.into();
        Self {
            name: format!("{address}/{pdu}"),
            address,
            pdu,
            kind,
            state: None,
            listener: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Call `listener` every time the device publishes a state.
    #[must_use]
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: FnMut(&DeviceState) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    #[must_use]
    pub const fn state(&self) -> Option<&DeviceState> {
        self.state.as_ref()
    }

    pub fn slave_id(&self) -> Result<u8, ModbusError> {
        parse_slave_id(&self.address)
    }

    /// Position of `name` in a select's option list.
    #[must_use]
    pub fn option_index(&self, name: &str) -> Option<usize> {
        match &self.kind {
            DeviceKind::Select { options } => options.iter().position(|o| o == name),
            _ => None,
        }
    }

    pub(crate) fn publish(&mut self, state: DeviceState) {
        if let Some(listener) = self.listener.as_mut() {
            listener(&state);
        }
        self.state = Some(state);
    }

    /// Deliver a decoded value. Values for other PDUs are ignored.
    pub fn handle_update(&mut self, pdu: u16, value: f32) {
        if pdu != self.pdu {
            return;
        }
        let state = match &self.kind {
            DeviceKind::Sensor | DeviceKind::Number | DeviceKind::Climate => {
                DeviceState::Value(value)
            }
            DeviceKind::BinarySensor | DeviceKind::Switch => DeviceState::On(value >= 1.0),
            DeviceKind::Select { options } => {
                let idx = value.round();
                if idx < 0.0 {
                    return;
                }
                match options.get(idx as usize) {
                    Some(option) => DeviceState::Option(option.clone()),
                    None => {
                        tracing::debug!(device = %self.name, value, "select value out of range");
                        return;
                    }
                }
            }
        };
        self.publish(state);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("pdu", &self.pdu)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Slave id encoded in a device address (`"<slave>[.<sub>]"`).
///
/// Only the integer before the first `.` is considered. Ids outside 1..=247
/// are rejected.
pub fn parse_slave_id(address: &str) -> Result<u8, ModbusError> {
    let head = address.split('.').next().unwrap_or_default().trim();
    head.parse::<u16>()
        .ok()
        .and_then(|id| u8::try_from(id).ok())
        .filter(|&id| is_valid_slave_id(id))
        .ok_or_else(|| ModbusError::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_slave_id() {
        assert_eq!(parse_slave_id("1").unwrap(), 1);
        assert_eq!(parse_slave_id("2.7").unwrap(), 2);
        assert_eq!(parse_slave_id("247").unwrap(), 247);
        for bad in ["0", "", "abc", ".5", "248", "300", "-1"] {
            assert!(
                matches!(parse_slave_id(bad), Err(ModbusError::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_handle_update_filters_pdu() {
        let mut d = Device::new(DeviceKind::Sensor, "1", 2000);
        d.handle_update(2001, 5.0);
        assert!(d.state().is_none());
        d.handle_update(2000, 21.5);
        assert_eq!(d.state(), Some(&DeviceState::Value(21.5)));
    }

    #[test]
    fn test_binary_threshold() {
        let mut d = Device::new(DeviceKind::BinarySensor, "1", 10);
        d.handle_update(10, 0.5);
        assert_eq!(d.state(), Some(&DeviceState::On(false)));
        d.handle_update(10, 1.0);
        assert_eq!(d.state(), Some(&DeviceState::On(true)));
    }

    #[test]
    fn test_select_rounds_index_and_ignores_out_of_range() {
        let options = vec!["off".to_string(), "summer".to_string(), "winter".to_string()];
        let mut d = Device::new(DeviceKind::Select { options }, "1", 3000);
        d.handle_update(3000, 1.6);
        assert_eq!(d.state(), Some(&DeviceState::Option("winter".into())));
        d.handle_update(3000, 7.0);
        assert_eq!(d.state(), Some(&DeviceState::Option("winter".into())));
        assert_eq!(d.option_index("summer"), Some(1));
    }

    #[test]
    fn test_listener_sees_every_publish() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut d = Device::new(DeviceKind::Climate, "3", 2000)
            .with_listener(move |s| sink.lock().unwrap().push(s.clone()));
        d.handle_update(2000, 20.0);
        d.handle_update(2000, 20.5);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
