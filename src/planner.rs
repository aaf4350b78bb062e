//! Read batch planning.
//!
//! The PDU table is sorted by register address, so neighbouring entries whose
//! ranges touch can be fetched with a single Read Holding Registers request.
//! `plan_batches` walks the table lazily and yields one [`ReadBatch`] per
//! maximal contiguous run (capped at the protocol's per-request limit).

use std::ops::Range;

use crate::pdu_registry::PduEntry;
use crate::rtu_define::MAX_READ_REGISTERS;
use crate::value_codec::decode;

/// One read transaction covering `entries` of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBatch {
    pub start_addr: u16,
    pub count: u16,
    /// Index range into the entry slice the batch was planned from.
    pub entries: Range<usize>,
}

impl ReadBatch {
    /// Last register address covered (inclusive).
    #[must_use]
    pub const fn last_addr(&self) -> u16 {
        self.start_addr.wrapping_add(self.count).wrapping_sub(1)
    }

    /// Split the registers returned for this batch back into per-entry values.
    ///
    /// Offsets accumulate by each entry's width. An entry whose registers are
    /// missing from `regs` still yields a value (the codec's `0.0` default).
    pub fn split<'a>(
        &'a self,
        entries: &'a [PduEntry],
        regs: &'a [u16],
    ) -> impl Iterator<Item = (&'a PduEntry, f32)> + 'a {
        let mut offset = 0usize;
        entries[self.entries.clone()].iter().map(move |e| {
            let width = usize::from(e.width);
            let start = offset.min(regs.len());
            let end = (offset + width).min(regs.len());
            offset += width;
            (e, decode(e, &regs[start..end]))
        })
    }
}

/// Lazily plan read batches over an address-sorted entry slice.
#[must_use]
pub fn plan_batches(entries: &[PduEntry]) -> Batches<'_> {
    Batches { entries, next: 0 }
}

/// Iterator returned by [`plan_batches`].
pub struct Batches<'a> {
    entries: &'a [PduEntry],
    next: usize,
}

impl Iterator for Batches<'_> {
    type Item = ReadBatch;

    fn next(&mut self) -> Option<ReadBatch> {
        let first = self.entries.get(self.next)?;
        let begin = self.next;
        let start = u32::from(first.reg_addr);
        let mut count = u32::from(first.width);
        let mut end = begin + 1;
        while let Some(e) = self.entries.get(end) {
            let width = u32::from(e.width);
            if u32::from(e.reg_addr) != start + count
                || count + width > u32::from(MAX_READ_REGISTERS)
            {
                break;
            }
            count += width;
            end += 1;
        }
        self.next = end;
        Some(ReadBatch {
            start_addr: first.reg_addr,
            // bounded by MAX_READ_REGISTERS, or a single entry width
            count: count as u16,
            entries: begin..end,
        })
    }
}
