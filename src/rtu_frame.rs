use crate::error::ModbusError;
use crate::rtu_define::{
    CRC_LEN, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    MAX_READ_REGISTERS, MAX_WRITE_REGISTERS, MIN_RESPONSE_LEN, WRITE_RESPONSE_LEN,
};

/// CRC-16/MODBUS: reflected polynomial 0xA001, initial value 0xFFFF.
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= u16::from(b);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of `frame` in wire order (low byte first).
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing CRC of a complete frame.
pub fn check_crc(frame: &[u8]) -> Result<(), ModbusError> {
    if frame.len() < CRC_LEN + 1 {
        return Err(ModbusError::Truncated {
            received: frame.len(),
            expected: CRC_LEN + 1,
        });
    }
    let split = frame.len() - CRC_LEN;
    let computed = crc16(&frame[..split]);
    let received = u16::from_le_bytes([frame[split], frame[split + 1]]);
    if computed != received {
        return Err(ModbusError::CrcMismatch {
            expected: computed,
            received,
        });
    }
    Ok(())
}

/// `[slave, 0x03, addr_hi, addr_lo, count_hi, count_lo, crc_lo, crc_hi]`
pub fn build_read_request(slave_id: u8, reg_addr: u16, count: u16) -> Result<Vec<u8>, ModbusError> {
    if count == 0 || count > MAX_READ_REGISTERS {
        return Err(ModbusError::Protocol(format!(
            "read count out of range (1..={MAX_READ_REGISTERS}): {count}"
        )));
    }
    let mut frame = Vec::with_capacity(8);
    frame.push(slave_id);
    frame.push(FC_READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&reg_addr.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);
    Ok(frame)
}

/// `[slave, 0x10, addr_hi, addr_lo, count_hi, count_lo, bytecount, values..., crc_lo, crc_hi]`
pub fn build_write_request(
    slave_id: u8,
    reg_addr: u16,
    values: &[u16],
) -> Result<Vec<u8>, ModbusError> {
    let count = u16::try_from(values.len())
        .ok()
        .filter(|c| (1..=MAX_WRITE_REGISTERS).contains(c))
        .ok_or_else(|| {
            ModbusError::Protocol(format!(
                "write register count out of range (1..={MAX_WRITE_REGISTERS}): {}",
                values.len()
            ))
        })?;
    let mut frame = Vec::with_capacity(9 + values.len() * 2);
    frame.push(slave_id);
    frame.push(FC_WRITE_MULTIPLE_REGISTERS);
    frame.extend_from_slice(&reg_addr.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    // count <= 0x7B so the byte count always fits
    frame.push((count * 2) as u8);
    for v in values {
        frame.extend_from_slice(&v.to_be_bytes());
    }
    append_crc(&mut frame);
    Ok(frame)
}

/// Function-specific body of a validated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// 0x03: declared byte count and the raw register bytes that followed it.
    Read { byte_count: u8, data: Vec<u8> },
    /// 0x10: echoed start address and register count.
    Write { reg_addr: u16, count: u16 },
}

/// Validate a complete response frame against the function that was requested.
///
/// Checks, in order: minimum length, CRC, exception flag, function code.
pub fn validate_response(bytes: &[u8], expected_func: u8) -> Result<ResponseBody, ModbusError> {
    if bytes.len() < MIN_RESPONSE_LEN {
        return Err(ModbusError::Truncated {
            received: bytes.len(),
            expected: MIN_RESPONSE_LEN,
        });
    }
    check_crc(bytes)?;
    let func = bytes[1];
    if func & EXCEPTION_FLAG != 0 {
        return Err(ModbusError::ExceptionResponse {
            function: func & !EXCEPTION_FLAG,
            code: bytes[2],
        });
    }
    if func != expected_func {
        return Err(ModbusError::Protocol(format!(
            "unexpected function code 0x{func:02X} (expected 0x{expected_func:02X})"
        )));
    }
    match func {
        FC_READ_HOLDING_REGISTERS => Ok(ResponseBody::Read {
            byte_count: bytes[2],
            data: bytes[3..bytes.len() - CRC_LEN].to_vec(),
        }),
        FC_WRITE_MULTIPLE_REGISTERS => {
            if bytes.len() < WRITE_RESPONSE_LEN {
                return Err(ModbusError::Truncated {
                    received: bytes.len(),
                    expected: WRITE_RESPONSE_LEN,
                });
            }
            Ok(ResponseBody::Write {
                reg_addr: u16::from_be_bytes([bytes[2], bytes[3]]),
                count: u16::from_be_bytes([bytes[4], bytes[5]]),
            })
        }
        other => Err(ModbusError::Protocol(format!(
            "unsupported function code 0x{other:02X}"
        ))),
    }
}

/// Try to determine the full length of a response frame from its header.
///
/// Returns `None` while too few bytes are buffered to tell.
#[must_use]
pub fn detect_response_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    let func = buf[1];
    if func & EXCEPTION_FLAG != 0 {
        return Some(MIN_RESPONSE_LEN);
    }
    match func {
        FC_READ_HOLDING_REGISTERS => buf.get(2).map(|bc| 3 + usize::from(*bc) + CRC_LEN),
        FC_WRITE_MULTIPLE_REGISTERS => Some(WRITE_RESPONSE_LEN),
        _ => None,
    }
}

/// Try to determine the full length of a request frame from its header.
#[must_use]
pub fn detect_request_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    match buf[1] {
        FC_READ_HOLDING_REGISTERS => Some(8),
        FC_WRITE_MULTIPLE_REGISTERS => buf.get(6).map(|bc| 7 + usize::from(*bc) + CRC_LEN),
        _ => None,
    }
}
