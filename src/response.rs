use crate::error::ModbusError;
use crate::rtu_define::{EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS};
use crate::rtu_frame::{append_crc, validate_response, ResponseBody};

/// A validated response frame from one slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuResponse {
    pub slave_id: u8,
    pub function_code: u8,
    pub body: ResponseBody,
}

impl RtuResponse {
    /// Non-panicking constructor which validates `frame` against the slave
    /// and function code that were requested.
    ///
    /// # Errors
    ///
    /// Returns `Err(ModbusError)` when `validate_response` rejects the frame,
    /// or `Protocol` when another slave answered.
    pub fn try_new(
        frame: &[u8],
        expected_slave: u8,
        expected_func: u8,
    ) -> Result<Self, ModbusError> {
        let body = validate_response(frame, expected_func)?;
        if frame[0] != expected_slave {
            return Err(ModbusError::Protocol(format!(
                "answer from slave {} to a request for slave {expected_slave}",
                frame[0]
            )));
        }
        Ok(Self {
            slave_id: frame[0],
            function_code: frame[1],
            body,
        })
    }

    /// Decode the register values of a read response, checking that the
    /// declared byte count matches the `count` registers that were asked for.
    pub fn registers(&self, count: u16) -> Result<Vec<u16>, ModbusError> {
        match &self.body {
            ResponseBody::Read { byte_count, data } => {
                let expected = usize::from(count) * 2;
                if usize::from(*byte_count) != expected {
                    return Err(ModbusError::ByteCountMismatch {
                        expected,
                        received: usize::from(*byte_count),
                    });
                }
                if data.len() < expected {
                    return Err(ModbusError::Truncated {
                        received: data.len(),
                        expected,
                    });
                }
                Ok(data[..expected]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect())
            }
            ResponseBody::Write { .. } => Err(ModbusError::Protocol(
                "write echo carries no register data".into(),
            )),
        }
    }
}

/// Build a read response frame for `registers` (slave side).
#[must_use]
pub fn build_read_response(slave_id: u8, registers: &[u16]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + registers.len() * 2);
    frame.push(slave_id);
    frame.push(FC_READ_HOLDING_REGISTERS);
    frame.push((registers.len() * 2) as u8);
    for r in registers {
        frame.extend_from_slice(&r.to_be_bytes());
    }
    append_crc(&mut frame);
    frame
}

/// Build a write echo frame (slave side).
#[must_use]
pub fn build_write_response(slave_id: u8, reg_addr: u16, count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave_id);
    frame.push(FC_WRITE_MULTIPLE_REGISTERS);
    frame.extend_from_slice(&reg_addr.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// Build an exception response frame (slave side).
#[must_use]
pub fn build_exception_response(slave_id: u8, function: u8, code: u8) -> Vec<u8> {
    let mut frame = vec![slave_id, function | EXCEPTION_FLAG, code];
    append_crc(&mut frame);
    frame
}
