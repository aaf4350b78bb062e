use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout: no response within the transaction window")]
    Timeout,

    #[error("truncated frame: received {received} bytes, expected at least {expected}")]
    Truncated { received: usize, expected: usize },

    #[error("CRC mismatch: computed 0x{expected:04X}, frame carries 0x{received:04X}")]
    CrcMismatch { expected: u16, received: u16 },

    #[error("exception response: function 0x{function:02X}, exception code 0x{code:02X}")]
    ExceptionResponse { function: u8, code: u8 },

    #[error("byte count mismatch: expected {expected}, response declares {received}")]
    ByteCountMismatch { expected: usize, received: usize },

    #[error("write echo mismatch: sent addr=0x{addr:04X} count={count}, echoed addr=0x{echo_addr:04X} count={echo_count}")]
    EchoMismatch {
        addr: u16,
        count: u16,
        echo_addr: u16,
        echo_count: u16,
    },

    #[error("unknown pdu: 0x{0:04X}")]
    UnknownPdu(u16),

    #[error("invalid slave address: '{0}'")]
    InvalidAddress(String),

    #[error("device is not registered with a controller")]
    ControllerNotSet,

    #[error("no pdu configured for device {0}")]
    NoPduConfigured(String),

    #[error("pdu registry error: {0}")]
    Registry(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
