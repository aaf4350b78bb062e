use crate::error::ModbusError;
use crate::rtu_define::{
    read_response_len, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, WRITE_RESPONSE_LEN,
};
use crate::rtu_frame::{build_read_request, build_write_request, check_crc};

/// A typed Modbus RTU request.
///
/// `RtuRequest` holds the fields of one master request and turns them into
/// wire bytes with `build`. The transaction client also uses it to know how
/// many response bytes to wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtuRequest {
    ReadHolding {
        slave_id: u8,
        reg_addr: u16,
        count: u16,
    },
    WriteMultiple {
        slave_id: u8,
        reg_addr: u16,
        values: Vec<u16>,
    },
}

impl RtuRequest {
    #[must_use]
    pub const fn read(slave_id: u8, reg_addr: u16, count: u16) -> Self {
        Self::ReadHolding {
            slave_id,
            reg_addr,
            count,
        }
    }

    #[must_use]
    pub fn write(slave_id: u8, reg_addr: u16, values: impl Into<Vec<u16>>) -> Self {
        Self::WriteMultiple {
            slave_id,
            reg_addr,
            values: values.into(),
        }
    }

    #[must_use]
    pub const fn slave_id(&self) -> u8 {
        match self {
            Self::ReadHolding { slave_id, .. } | Self::WriteMultiple { slave_id, .. } => *slave_id,
        }
    }

    #[must_use]
    pub const fn function_code(&self) -> u8 {
        match self {
            Self::ReadHolding { .. } => FC_READ_HOLDING_REGISTERS,
            Self::WriteMultiple { .. } => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }

    #[must_use]
    pub const fn reg_addr(&self) -> u16 {
        match self {
            Self::ReadHolding { reg_addr, .. } | Self::WriteMultiple { reg_addr, .. } => *reg_addr,
        }
    }

    /// Number of registers addressed by this request.
    #[must_use]
    pub fn register_count(&self) -> u16 {
        match self {
            Self::ReadHolding { count, .. } => *count,
            Self::WriteMultiple { values, .. } => u16::try_from(values.len()).unwrap_or(u16::MAX),
        }
    }

    /// Length of a complete, non-exception response to this request.
    #[must_use]
    pub fn expected_response_len(&self) -> usize {
        match self {
            Self::ReadHolding { count, .. } => read_response_len(*count),
            Self::WriteMultiple { .. } => WRITE_RESPONSE_LEN,
        }
    }

    /// Build the wire frame, CRC included.
    pub fn build(&self) -> Result<Vec<u8>, ModbusError> {
        match self {
            Self::ReadHolding {
                slave_id,
                reg_addr,
                count,
            } => build_read_request(*slave_id, *reg_addr, *count),
            Self::WriteMultiple {
                slave_id,
                reg_addr,
                values,
            } => build_write_request(*slave_id, *reg_addr, values),
        }
    }

    /// Interpret a raw request frame (as seen by a slave) as a typed request.
    /// This is the inverse of `build`.
    pub fn try_from_frame(frame: &[u8]) -> Result<Self, ModbusError> {
        if frame.len() < 8 {
            return Err(ModbusError::Truncated {
                received: frame.len(),
                expected: 8,
            });
        }
        check_crc(frame)?;
        let slave_id = frame[0];
        let reg_addr = u16::from_be_bytes([frame[2], frame[3]]);
        let count = u16::from_be_bytes([frame[4], frame[5]]);
        match frame[1] {
            FC_READ_HOLDING_REGISTERS => Ok(Self::read(slave_id, reg_addr, count)),
            FC_WRITE_MULTIPLE_REGISTERS => {
                let byte_count = usize::from(frame[6]);
                let expected = 7 + byte_count + 2;
                if frame.len() != expected {
                    return Err(ModbusError::Truncated {
                        received: frame.len(),
                        expected,
                    });
                }
                if byte_count != usize::from(count) * 2 {
                    return Err(ModbusError::ByteCountMismatch {
                        expected: usize::from(count) * 2,
                        received: byte_count,
                    });
                }
                let values = frame[7..7 + byte_count]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect::<Vec<_>>();
                Ok(Self::write(slave_id, reg_addr, values))
            }
            other => Err(ModbusError::Protocol(format!(
                "unsupported function code 0x{other:02X}"
            ))),
        }
    }
}
