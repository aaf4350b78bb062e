use std::io::{Read, Write};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::config::config as global_config;
use crate::error::ModbusError;
use crate::rtu_frame::detect_response_len;

/// Upper bound on bytes discarded before a request is sent.
pub const MAX_STALE_DRAIN: usize = 256;

/// Byte-level half-duplex serial link as seen by the master.
///
/// All methods are non-blocking: `available` reports how many received bytes
/// are buffered and `read_byte` returns `None` when none is. Waiting for the
/// slave is done by the caller (see [`send_and_collect`]).
pub trait SerialLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ModbusError>;

    fn flush(&mut self) -> Result<(), ModbusError>;

    fn available(&mut self) -> usize;

    fn read_byte(&mut self) -> Option<u8>;

    /// Drive the RS-485 direction pin: `true` asserts transmit-enable,
    /// `false` releases the bus back to receive. Links without a direction
    /// pin keep the default no-op.
    fn set_transmit(&mut self, _enable: bool) -> Result<(), ModbusError> {
        Ok(())
    }
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ModbusError> {
        (**self).write(bytes)
    }
    fn flush(&mut self) -> Result<(), ModbusError> {
        (**self).flush()
    }
    fn available(&mut self) -> usize {
        (**self).available()
    }
    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }
    fn set_transmit(&mut self, enable: bool) -> Result<(), ModbusError> {
        (**self).set_transmit(enable)
    }
}

/// A real serial port (8N1) opened through `tokio-serial`.
///
/// The RTS line doubles as the RS-485 direction pin unless disabled with
/// [`SerialPortLink::without_rts_direction`] (for adapters that switch
/// direction automatically).
pub struct SerialPortLink {
    port: Box<dyn tokio_serial::SerialPort>,
    rts_direction: bool,
}

impl std::fmt::Debug for SerialPortLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortLink")
            .field("port", &self.port.name())
            .field("rts_direction", &self.rts_direction)
            .finish()
    }
}

impl SerialPortLink {
    /// Open `path` (e.g. "/dev/ttyUSB0" or "COM3") at `baud_rate`.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ModbusError> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| ModbusError::Io(std::io::Error::other(format!("open {path}: {e}"))))?;
        let mut link = Self {
            port,
            rts_direction: true,
        };
        // start in receive mode
        link.set_transmit(false)?;
        Ok(link)
    }

    #[must_use]
    pub const fn without_rts_direction(mut self) -> Self {
        self.rts_direction = false;
        self
    }
}

impl SerialLink for SerialPortLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ModbusError> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ModbusError> {
        Write::flush(&mut self.port)?;
        Ok(())
    }

    fn available(&mut self) -> usize {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .unwrap_or(0)
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.available() == 0 {
            return None;
        }
        let mut b = [0u8; 1];
        match self.port.read(&mut b) {
            Ok(1) => Some(b[0]),
            _ => None,
        }
    }

    fn set_transmit(&mut self, enable: bool) -> Result<(), ModbusError> {
        if self.rts_direction {
            self.port
                .write_request_to_send(enable)
                .map_err(|e| ModbusError::Io(std::io::Error::other(e.to_string())))?;
        }
        Ok(())
    }
}

pub fn hex_dump(b: &[u8]) -> String {
    b.iter()
        .map(|x| format!("{x:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write `frame` with the direction pin asserted, then collect the response.
///
/// Bytes are accumulated for at most `window`, polling the link every
/// `backoff`. Collection stops early once `expected_len` bytes arrived, or as
/// soon as the buffered header describes a shorter complete frame (an
/// exception response, or a read answer declaring fewer registers).
///
/// Returns whatever was received; validation is left to the caller.
///
/// # Errors
///
/// `Timeout` when not a single byte arrived within the window, or the link's
/// own error when writing fails.
pub async fn send_and_collect<L: SerialLink + ?Sized>(
    link: &mut L,
    frame: &[u8],
    window: Duration,
    backoff: Duration,
    expected_len: usize,
) -> Result<Vec<u8>, ModbusError> {
    // a late answer to an earlier timed-out request must not be taken for ours;
    // drop at most what is buffered right now
    let pending = link.available().min(MAX_STALE_DRAIN);
    let mut stale = Vec::with_capacity(pending);
    for _ in 0..pending {
        match link.read_byte() {
            Some(b) => stale.push(b),
            None => break,
        }
    }
    if !stale.is_empty() {
        log::debug!("[RTU drop stale] {}", hex_dump(&stale));
    }

    link.set_transmit(true)?;
    let written = link.write(frame).and_then(|()| link.flush());
    // release the bus even when the write failed
    link.set_transmit(false)?;
    written?;
    if global_config().log_frames {
        log::debug!("[RTU send] {}", hex_dump(frame));
    }

    let start = Instant::now();
    let mut buf: Vec<u8> = Vec::with_capacity(expected_len);
    while start.elapsed() < window {
        let avail = link.available().min(expected_len.saturating_sub(buf.len()));
        for _ in 0..avail {
            match link.read_byte() {
                Some(b) => buf.push(b),
                None => break,
            }
        }
        let target = detect_response_len(&buf).map_or(expected_len, |n| n.min(expected_len));
        if !buf.is_empty() && buf.len() >= target {
            break;
        }
        sleep(backoff).await;
    }

    if buf.is_empty() {
        return Err(ModbusError::Timeout);
    }
    if global_config().log_frames {
        log::debug!("[RTU recv] {}", hex_dump(&buf));
    }
    Ok(buf)
}
