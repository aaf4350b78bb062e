use crate::error::ModbusError;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Register interpretation of a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PduType {
    U16,
    S16,
    U8,
    Flag8,
    U32,
    S32,
    Float32,
    Temp,
    /// Fallback for parameters whose view declares no known return type.
    Unknown,
}

impl PduType {
    /// Number of registers one value of this type occupies.
    #[must_use]
    pub const fn width(self) -> u8 {
        match self {
            Self::U32 | Self::S32 | Self::Float32 => 2,
            Self::U16 | Self::S16 | Self::U8 | Self::Flag8 | Self::Temp | Self::Unknown => 1,
        }
    }

    /// Map a controller-configuration "return" tag (`u16`, `s16`, `u8`, `temp`,
    /// `LB`, ...) to a type and scale. `decimal` is the number of decimal
    /// places of a temperature view (`decimal = 1` means 0.1 per unit).
    #[must_use]
    pub fn from_return_tag(tag: &str, decimal: Option<u32>) -> (Self, f32) {
        match tag {
            "u16" => (Self::U16, 1.0),
            "s16" => (Self::S16, 1.0),
            "u8" => (Self::U8, 1.0),
            "u32" => (Self::U32, 1.0),
            "s32" => (Self::S32, 1.0),
            "float" | "float32" => (Self::Float32, 1.0),
            "LB" => (Self::Flag8, 1.0),
            "temp" => {
                let scale = match decimal {
                    Some(d) if d > 0 => 10f32.powi(-(d.min(6) as i32)),
                    _ => 1.0,
                };
                (Self::Temp, scale)
            }
            _ => (Self::Unknown, 1.0),
        }
    }
}

/// One row of the PDU table.
#[derive(Debug, Clone, PartialEq)]
pub struct PduEntry {
    pub pdu_id: u16,
    pub reg_addr: u16,
    /// Register count, 1 or 2.
    pub width: u8,
    pub kind: PduType,
    pub scale: f32,
    /// Table metadata for device setup; writes are not gated on it.
    pub writable: bool,
    /// Only meaningful for `Temp`: interpret the raw register as two's complement.
    pub signed: bool,
    pub label: String,
}

impl PduEntry {
    /// Entry with `width` derived from `kind`, scale 1, not marked writable.
    #[must_use]
    pub fn new(pdu_id: u16, reg_addr: u16, kind: PduType) -> Self {
        Self {
            pdu_id,
            reg_addr,
            width: kind.width(),
            kind,
            scale: 1.0,
            writable: false,
            signed: false,
            label: String::new(),
        }
    }

    #[must_use]
    pub const fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    #[must_use]
    pub const fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    #[must_use]
    pub const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// First register address past this entry.
    #[must_use]
    pub const fn end_addr(&self) -> u32 {
        self.reg_addr as u32 + self.width as u32
    }
}

#[derive(Debug, Deserialize)]
struct PduFile {
    #[serde(rename = "pdu")]
    pub pdus: Vec<PduRaw>,
}

#[derive(Debug, Deserialize, Clone)]
struct PduRaw {
    pub id: u16,
    /// defaults to the pdu id, as in the generated appliance tables
    pub reg: Option<u16>,
    #[serde(rename = "type")]
    pub kind: Option<PduType>,
    /// alternative to `type`: raw return tag from the appliance configuration
    #[serde(rename = "return")]
    pub return_tag: Option<String>,
    pub decimal: Option<u32>,
    pub width: Option<u8>,
    pub scale: Option<f32>,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub label: String,
}

impl PduRaw {
    fn into_entry(self) -> PduEntry {
        let (kind, derived_scale) = match (self.kind, self.return_tag.as_deref()) {
            (Some(k), _) => (k, 1.0),
            (None, Some(tag)) => PduType::from_return_tag(tag, self.decimal),
            (None, None) => (PduType::Unknown, 1.0),
        };
        PduEntry {
            pdu_id: self.id,
            reg_addr: self.reg.unwrap_or(self.id),
            width: self.width.unwrap_or_else(|| kind.width()),
            kind,
            scale: self.scale.unwrap_or(derived_scale),
            writable: self.writable,
            signed: self.signed,
            label: self.label,
        }
    }
}

static GLOBAL_PDU_REGISTRY: OnceCell<Arc<PduRegistry>> = OnceCell::new();

/// Immutable PDU table, sorted by register address, with an id index.
#[derive(Debug, Clone)]
pub struct PduRegistry {
    entries: Vec<PduEntry>,
    by_id: HashMap<u16, usize>,
}

impl PduRegistry {
    /// Build a registry from entries in any order. Entries are sorted by
    /// register address and validated.
    pub fn from_entries(mut entries: Vec<PduEntry>) -> Result<Self, ModbusError> {
        entries.sort_by_key(|e| e.reg_addr);
        let mut ids = HashSet::new();
        for e in &entries {
            if !ids.insert(e.pdu_id) {
                return Err(ModbusError::Registry(format!(
                    "duplicate pdu id: 0x{:04X}",
                    e.pdu_id
                )));
            }
            if e.width != e.kind.width() {
                return Err(ModbusError::Registry(format!(
                    "pdu 0x{:04X}: width {} does not match type {:?}",
                    e.pdu_id, e.width, e.kind
                )));
            }
            if !e.scale.is_finite() || e.scale == 0.0 {
                return Err(ModbusError::Registry(format!(
                    "pdu 0x{:04X}: invalid scale {}",
                    e.pdu_id, e.scale
                )));
            }
            if e.end_addr() > 0x1_0000 {
                return Err(ModbusError::Registry(format!(
                    "pdu 0x{:04X}: register range overflows the address space",
                    e.pdu_id
                )));
            }
        }
        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.pdu_id, i))
            .collect();
        Ok(Self { entries, by_id })
    }

    /// Parse a PDU table TOML from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ModbusError> {
        let file: PduFile = toml::from_str(s).map_err(|e| {
            let msg = e.message().to_string();
            match e.span().map(|span| line_col(s, span.start)) {
                Some((line, col)) => {
                    ModbusError::Registry(format!("pdu table parse error at {line}:{col}: {msg}"))
                }
                None => ModbusError::Registry(format!("pdu table parse error: {msg}")),
            }
        })?;
        Self::from_entries(file.pdus.into_iter().map(PduRaw::into_entry).collect())
    }

    /// Load and parse a PDU table TOML from a filesystem path.
    pub fn from_path(path: &Path) -> Result<Self, ModbusError> {
        let s = fs::read_to_string(path)
            .map_err(|e| ModbusError::Registry(format!("read {}: {e}", path.display())))?;
        s.parse::<Self>()
    }

    /// The table compiled into the crate (`src/pdus.toml`).
    pub fn embedded() -> Result<Self, ModbusError> {
        Self::from_str(include_str!("pdus.toml"))
    }

    /// Entries sorted ascending by register address.
    #[must_use]
    pub fn entries(&self) -> &[PduEntry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, pdu_id: u16) -> Option<&PduEntry> {
        self.by_id.get(&pdu_id).map(|&i| &self.entries[i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install this registry as the process-wide default.
    pub fn set_global(self) -> Result<(), ModbusError> {
        GLOBAL_PDU_REGISTRY
            .set(Arc::new(self))
            .map_err(|_| ModbusError::Registry("global pdu registry already set".into()))
    }

    /// The process-wide registry, if one was installed.
    #[must_use]
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL_PDU_REGISTRY.get().cloned()
    }
}

impl std::str::FromStr for PduRegistry {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

// 1-based line and column of a byte offset
fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let upto = &src[..offset.min(src.len())];
    let line = upto.matches('\n').count() + 1;
    let col = upto.rfind('\n').map_or(upto.len(), |nl| upto.len() - nl - 1) + 1;
    (line, col)
}
