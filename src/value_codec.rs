use crate::error::ModbusError;
use crate::pdu_registry::{PduEntry, PduType};

/// Trait for types that can be decoded from a slice of holding registers.
///
/// Multi-register values use Modbus register order: the first register holds
/// the high 16 bits. The implementation returns the decoded value and how
/// many registers were consumed.
pub trait FromRegisters: Sized {
    /// Number of registers consumed by one value of this type.
    const REGISTERS: usize;

    fn from_registers(regs: &[u16]) -> Result<(Self, usize), ModbusError>;
}

/// Trait for types that can be encoded into holding registers for writing.
pub trait ToRegisters {
    const REGISTERS: usize;

    /// Encode this value into `out`, high register first.
    fn to_registers(&self, out: &mut Vec<u16>);
}

fn need(regs: &[u16], n: usize, what: &str) -> Result<(), ModbusError> {
    if regs.len() < n {
        return Err(ModbusError::Protocol(format!("not enough registers for {what}")));
    }
    Ok(())
}

fn combine(regs: &[u16]) -> u32 {
    (u32::from(regs[0]) << 16) | u32::from(regs[1])
}

fn split(v: u32, out: &mut Vec<u16>) {
    out.push((v >> 16) as u16);
    out.push((v & 0xFFFF) as u16);
}

impl FromRegisters for u16 {
    const REGISTERS: usize = 1;
    fn from_registers(regs: &[u16]) -> Result<(Self, usize), ModbusError> {
        need(regs, 1, "u16")?;
        Ok((regs[0], 1))
    }
}

impl FromRegisters for i16 {
    const REGISTERS: usize = 1;
    fn from_registers(regs: &[u16]) -> Result<(Self, usize), ModbusError> {
        need(regs, 1, "i16")?;
        Ok((regs[0] as i16, 1))
    }
}

impl FromRegisters for u32 {
    const REGISTERS: usize = 2;
    fn from_registers(regs: &[u16]) -> Result<(Self, usize), ModbusError> {
        need(regs, 2, "u32")?;
        Ok((combine(regs), 2))
    }
}

impl FromRegisters for i32 {
    const REGISTERS: usize = 2;
    fn from_registers(regs: &[u16]) -> Result<(Self, usize), ModbusError> {
        need(regs, 2, "i32")?;
        Ok((combine(regs) as i32, 2))
    }
}

impl FromRegisters for f32 {
    const REGISTERS: usize = 2;
    fn from_registers(regs: &[u16]) -> Result<(Self, usize), ModbusError> {
        need(regs, 2, "f32")?;
        Ok((f32::from_bits(combine(regs)), 2))
    }
}

impl ToRegisters for u16 {
    const REGISTERS: usize = 1;
    fn to_registers(&self, out: &mut Vec<u16>) {
        out.push(*self);
    }
}

impl ToRegisters for i16 {
    const REGISTERS: usize = 1;
    fn to_registers(&self, out: &mut Vec<u16>) {
        out.push(*self as u16);
    }
}

impl ToRegisters for u32 {
    const REGISTERS: usize = 2;
    fn to_registers(&self, out: &mut Vec<u16>) {
        split(*self, out);
    }
}

impl ToRegisters for i32 {
    const REGISTERS: usize = 2;
    fn to_registers(&self, out: &mut Vec<u16>) {
        split(*self as u32, out);
    }
}

impl ToRegisters for f32 {
    const REGISTERS: usize = 2;
    fn to_registers(&self, out: &mut Vec<u16>) {
        split(self.to_bits(), out);
    }
}

/// Decode the registers of one PDU into its engineering value.
///
/// Missing registers (a short read) decode to `0.0` rather than failing, so a
/// partially answered batch still produces one value per entry.
#[must_use]
pub fn decode(entry: &PduEntry, raw: &[u16]) -> f32 {
    let scale = entry.scale;
    match entry.kind {
        PduType::Temp => match raw.first() {
            Some(&r) if entry.signed => f32::from(r as i16) * scale,
            Some(&r) => f32::from(r) * scale,
            None => 0.0,
        },
        PduType::U16 | PduType::Unknown => {
            u16::from_registers(raw).map_or(0.0, |(v, _)| f32::from(v))
        }
        PduType::S16 => i16::from_registers(raw).map_or(0.0, |(v, _)| f32::from(v)),
        PduType::U8 | PduType::Flag8 => raw.first().map_or(0.0, |&r| f32::from(r & 0xFF)),
        PduType::U32 => u32::from_registers(raw).map_or(0.0, |(v, _)| v as f32 * scale),
        PduType::S32 => i32::from_registers(raw).map_or(0.0, |(v, _)| v as f32 * scale),
        PduType::Float32 => f32::from_registers(raw).map_or(0.0, |(v, _)| v * scale),
    }
}

// Nearest integer, then wrapped to the register width by the `as` casts at
// the call sites. Out-of-range floats saturate into i64 first.
fn round_to_i64(v: f32) -> i64 {
    v.round() as i64
}

/// Encode an engineering value into the registers of one PDU.
///
/// Integer kinds round to the nearest integer and wrap to their width; there
/// is no overflow error.
#[must_use]
pub fn encode(entry: &PduEntry, value: f32) -> Vec<u16> {
    let mut out = Vec::with_capacity(usize::from(entry.width));
    match entry.kind {
        PduType::Temp => out.push(round_to_i64(value / entry.scale) as u16),
        PduType::U16 | PduType::S16 | PduType::Unknown => {
            out.push(round_to_i64(value) as u16);
        }
        PduType::U8 | PduType::Flag8 => out.push((round_to_i64(value) & 0xFF) as u16),
        PduType::U32 | PduType::S32 => {
            (round_to_i64(value / entry.scale) as u32).to_registers(&mut out);
        }
        PduType::Float32 => (value / entry.scale).to_registers(&mut out),
    }
    out
}
