//! Simulated Modbus RTU slaves.
//!
//! - [`RegisterBank`]: holding register image of one slave
//! - [`handle_request`]: answer one request frame against a bank
//! - [`FrameAssembler`]: cut the received byte stream into request frames
//! - [`MockLink`]: an in-memory [`SerialLink`] that plays one or more slaves,
//!   with fault injection and a record of everything the master did

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use immergas_modbus::error::ModbusError;
use immergas_modbus::request::RtuRequest;
use immergas_modbus::response::{
    build_exception_response, build_read_response, build_write_response,
};
use immergas_modbus::rtu_define::{
    EX_ILLEGAL_DATA_ADDRESS, EX_ILLEGAL_DATA_VALUE, EX_ILLEGAL_FUNCTION,
    FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, MAX_READ_REGISTERS,
    MAX_WRITE_REGISTERS,
};
use immergas_modbus::rtu_frame::{append_crc, check_crc, detect_request_len};
use immergas_modbus::transport::SerialLink;

/// Holding registers of one slave.
///
/// Unset registers read as 0 unless strict addressing is enabled, in which
/// case touching one answers "illegal data address".
#[derive(Debug, Clone, Default)]
pub struct RegisterBank {
    pub slave_id: u8,
    registers: HashMap<u16, u16>,
    strict: bool,
}

impl RegisterBank {
    #[must_use]
    pub fn new(slave_id: u8) -> Self {
        Self {
            slave_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_strict_addressing(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Preset consecutive registers starting at `start`.
    #[must_use]
    pub fn with_registers(mut self, start: u16, values: &[u16]) -> Self {
        self.load(start, values);
        self
    }

    pub fn set(&mut self, addr: u16, value: u16) {
        self.registers.insert(addr, value);
    }

    pub fn load(&mut self, start: u16, values: &[u16]) {
        for (addr, v) in (start..=u16::MAX).zip(values) {
            self.registers.insert(addr, *v);
        }
    }

    #[must_use]
    pub fn get(&self, addr: u16) -> Option<u16> {
        self.registers.get(&addr).copied()
    }

    fn covers(&self, start: u16, count: u16) -> bool {
        let end = u32::from(start) + u32::from(count);
        if end > 0x1_0000 {
            return false;
        }
        !self.strict || (u32::from(start)..end).all(|a| self.registers.contains_key(&(a as u16)))
    }

    fn read(&self, start: u16, count: u16) -> Vec<u16> {
        (0..count)
            .map(|i| self.get(start.wrapping_add(i)).unwrap_or(0))
            .collect()
    }
}

/// Answer one request frame the way a slave would.
///
/// Returns `None` when a real slave stays silent: the frame is short or
/// corrupted, or it is addressed to another slave.
#[must_use]
pub fn handle_request(bank: &mut RegisterBank, frame: &[u8]) -> Option<Vec<u8>> {
    if frame.len() < 4 || check_crc(frame).is_err() || frame[0] != bank.slave_id {
        return None;
    }
    let slave = bank.slave_id;
    let function = frame[1];
    if function != FC_READ_HOLDING_REGISTERS && function != FC_WRITE_MULTIPLE_REGISTERS {
        return Some(build_exception_response(slave, function, EX_ILLEGAL_FUNCTION));
    }
    let request = match RtuRequest::try_from_frame(frame) {
        Ok(r) => r,
        Err(ModbusError::ByteCountMismatch { .. }) => {
            return Some(build_exception_response(slave, function, EX_ILLEGAL_DATA_VALUE));
        }
        Err(_) => return None,
    };
    let exception = |code| Some(build_exception_response(slave, function, code));
    match request {
        RtuRequest::ReadHolding {
            reg_addr, count, ..
        } => {
            if count == 0 || count > MAX_READ_REGISTERS {
                return exception(EX_ILLEGAL_DATA_VALUE);
            }
            if !bank.covers(reg_addr, count) {
                return exception(EX_ILLEGAL_DATA_ADDRESS);
            }
            Some(build_read_response(slave, &bank.read(reg_addr, count)))
        }
        RtuRequest::WriteMultiple {
            reg_addr, values, ..
        } => {
            let count = values.len() as u16;
            if count == 0 || count > MAX_WRITE_REGISTERS {
                return exception(EX_ILLEGAL_DATA_VALUE);
            }
            if !bank.covers(reg_addr, count) {
                return exception(EX_ILLEGAL_DATA_ADDRESS);
            }
            bank.load(reg_addr, &values);
            Some(build_write_response(slave, reg_addr, count))
        }
    }
}

/// Cuts the byte stream seen by a slave into request frames.
///
/// A frame is complete once its header says so. Bytes whose length cannot be
/// derived from the header (unknown function codes, noise) are handed over
/// as one frame after the line has been quiet for `gap`.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    last_byte: Instant,
    gap: Duration,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(gap: Duration) -> Self {
        Self {
            buf: Vec::with_capacity(256),
            last_byte: Instant::now(),
            gap,
        }
    }

    pub fn push(&mut self, byte: u8, now: Instant) {
        self.buf.push(byte);
        self.last_byte = now;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the next frame, if one is complete at `now`.
    pub fn next_frame(&mut self, now: Instant) -> Option<Vec<u8>> {
        match detect_request_len(&self.buf) {
            Some(len) if self.buf.len() >= len => Some(self.buf.drain(..len).collect()),
            _ if !self.buf.is_empty()
                && now.saturating_duration_since(self.last_byte) >= self.gap =>
            {
                Some(std::mem::take(&mut self.buf))
            }
            _ => None,
        }
    }
}

/// Parse a `ADDR=VALUE` register preset. Both sides accept decimal or
/// `0x`-prefixed hex.
pub fn parse_register_preset(s: &str) -> Result<(u16, u16)> {
    let Some((addr, value)) = s.split_once('=') else {
        bail!("expected ADDR=VALUE, got '{s}'");
    };
    let addr = parse_u16(addr.trim()).with_context(|| format!("bad address in '{s}'"))?;
    let value = parse_u16(value.trim()).with_context(|| format!("bad value in '{s}'"))?;
    Ok((addr, value))
}

fn parse_u16(s: &str) -> Result<u16> {
    let v = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(v)
}

/// Misbehaviour applied to a response before the master sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Drop the response entirely.
    Silence,
    /// Flip the last CRC byte.
    CorruptCrc,
    /// Echo a different start address on writes (CRC stays valid).
    WrongEcho,
    /// Deliver only the first `n` bytes.
    Truncate(usize),
    /// Replace the response with an exception carrying this code.
    Exception(u8),
    /// Answer with another slave id in the header (CRC stays valid).
    ForeignSlave(u8),
}

/// What the master did to the link, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Transmit(bool),
    Write(Vec<u8>),
    Flush,
}

/// In-memory serial link serving one or more simulated slaves.
///
/// Requests are answered when the master flushes. Banks are shared, so a
/// test can keep a clone of the `Arc` and inspect registers after a write.
#[derive(Debug, Default)]
pub struct MockLink {
    banks: Vec<Arc<Mutex<RegisterBank>>>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    events: Vec<LinkEvent>,
    faults: VecDeque<Fault>,
    always: Option<Fault>,
    drip: Option<usize>,
    requests: usize,
}

impl MockLink {
    #[must_use]
    pub fn new(bank: RegisterBank) -> Self {
        Self::default().with_bank(Arc::new(Mutex::new(bank)))
    }

    /// A link on which no slave ever answers.
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bank(mut self, bank: Arc<Mutex<RegisterBank>>) -> Self {
        self.banks.push(bank);
        self
    }

    /// Apply `fault` to every response.
    #[must_use]
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.always = Some(fault);
        self
    }

    /// Report at most `n` bytes per `available` call.
    #[must_use]
    pub fn with_drip(mut self, n: usize) -> Self {
        self.drip = Some(n.max(1));
        self
    }

    /// Apply `fault` to the next response only. Queued faults take
    /// precedence over the one set by `with_fault`.
    pub fn push_fault(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    /// Put raw bytes in the receive buffer as if they arrived late.
    pub fn inject_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    #[must_use]
    pub fn events(&self) -> &[LinkEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Request frames flushed so far.
    #[must_use]
    pub const fn request_count(&self) -> usize {
        self.requests
    }

    #[must_use]
    pub fn bank(&self, slave_id: u8) -> Option<Arc<Mutex<RegisterBank>>> {
        self.banks
            .iter()
            .find(|b| lock(b).slave_id == slave_id)
            .cloned()
    }

    fn answer(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let bank = self.banks.iter().find(|b| lock(b).slave_id == frame[0])?;
        let response = handle_request(&mut lock(bank), frame)?;
        let fault = self.faults.pop_front().or_else(|| self.always.clone());
        match fault {
            None => Some(response),
            Some(Fault::Silence) => None,
            Some(Fault::CorruptCrc) => {
                let mut r = response;
                if let Some(last) = r.last_mut() {
                    *last ^= 0xFF;
                }
                Some(r)
            }
            Some(Fault::WrongEcho) => {
                let mut r = response;
                if r.len() == 8 && r[1] == FC_WRITE_MULTIPLE_REGISTERS {
                    let addr = u16::from_be_bytes([r[2], r[3]]).wrapping_add(1);
                    r.truncate(6);
                    r[2..4].copy_from_slice(&addr.to_be_bytes());
                    append_crc(&mut r);
                }
                Some(r)
            }
            Some(Fault::Truncate(n)) => Some(response[..n.min(response.len())].to_vec()),
            Some(Fault::Exception(code)) => {
                Some(build_exception_response(frame[0], frame[1], code))
            }
            Some(Fault::ForeignSlave(id)) => {
                let mut r = response;
                r.truncate(r.len() - 2);
                r[0] = id;
                append_crc(&mut r);
                Some(r)
            }
        }
    }
}

fn lock(bank: &Arc<Mutex<RegisterBank>>) -> MutexGuard<'_, RegisterBank> {
    // a test that panicked while holding the lock already failed
    bank.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl SerialLink for MockLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ModbusError> {
        self.events.push(LinkEvent::Write(bytes.to_vec()));
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ModbusError> {
        self.events.push(LinkEvent::Flush);
        let frame = std::mem::take(&mut self.pending);
        if frame.is_empty() {
            return Ok(());
        }
        self.requests += 1;
        if let Some(response) = self.answer(&frame) {
            self.rx.extend(response);
        }
        Ok(())
    }

    fn available(&mut self) -> usize {
        match self.drip {
            Some(n) => self.rx.len().min(n),
            None => self.rx.len(),
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn set_transmit(&mut self, enable: bool) -> Result<(), ModbusError> {
        self.events.push(LinkEvent::Transmit(enable));
        Ok(())
    }
}
