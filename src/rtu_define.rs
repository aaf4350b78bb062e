//! Modbus RTU protocol definitions.
//!
//! Constants shared by the frame codec, the transaction client and the mock
//! slave:
//! - function codes used on the Immergas bus (0x03 / 0x10)
//! - exception flag and exception codes
//! - register count limits and minimum frame lengths
//! - valid slave id range
//!
//! NOTE: frame assembly and validation live in `rtu_frame`.

/// Read Holding Registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Write Multiple Registers
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Set on the echoed function code when the slave answers with an exception.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Upper bound of registers a single 0x03 request may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Upper bound of registers a single 0x10 request may carry.
pub const MAX_WRITE_REGISTERS: u16 = 0x7B;

/// Trailing CRC bytes, low byte first.
pub const CRC_LEN: usize = 2;

/// Smallest frame that can carry anything useful: slave, function, one byte, crc.
pub const MIN_RESPONSE_LEN: usize = 5;

/// slave + function + addr(2) + count(2) + crc(2)
pub const WRITE_RESPONSE_LEN: usize = 8;

pub const MIN_SLAVE_ID: u8 = 1;
pub const MAX_SLAVE_ID: u8 = 247;

// Standard exception codes
pub const EX_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EX_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EX_ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const EX_SLAVE_DEVICE_FAILURE: u8 = 0x04;

/// Return a short static name for a known exception code, or None if unknown.
#[must_use]
pub const fn exception_name(code: u8) -> Option<&'static str> {
    match code {
        EX_ILLEGAL_FUNCTION => Some("illegal function"),
        EX_ILLEGAL_DATA_ADDRESS => Some("illegal data address"),
        EX_ILLEGAL_DATA_VALUE => Some("illegal data value"),
        EX_SLAVE_DEVICE_FAILURE => Some("slave device failure"),
        0x05 => Some("acknowledge"),
        0x06 => Some("slave device busy"),
        _ => None,
    }
}

/// Expected length of a complete read response carrying `count` registers.
#[must_use]
pub const fn read_response_len(count: u16) -> usize {
    MIN_RESPONSE_LEN + 2 * count as usize
}

#[must_use]
pub const fn is_valid_slave_id(id: u8) -> bool {
    id >= MIN_SLAVE_ID && id <= MAX_SLAVE_ID
}
