//! Variable batch - the payload shared by snapshots, broadcasts and writes
//!
//! Layout:
//! - Reference fingerprint (8 bytes)
//! - Base timestamp: seconds (8 bytes, signed) + nanos (4 bytes)
//! - Item count (4 bytes)
//! - Items: id (4) | quality (1) | seconds (8) | nanos (4) | tag (1) | len (4) | value
//!
//! Every item carries a timestamp field, but a batch has exactly one
//! timestamp: writers stamp each item with the base timestamp and readers
//! ignore the per-item field.

use bytes::{BufMut, Bytes, BytesMut};

use varsync_core::{Quality, Timestamp, VariableId, VarsyncResult};

use crate::{put_count, EncodedValue, WireReader};

/// Fixed part of a batch item
pub const ITEM_HEADER_SIZE: usize = 4 + 1 + 8 + 4 + 1 + 4;

/// One `(id, value, quality)` entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableEntry {
    pub id: VariableId,
    pub value: EncodedValue,
    pub quality: Quality,
}

impl VariableEntry {
    pub fn new(id: VariableId, value: EncodedValue, quality: Quality) -> Self {
        VariableEntry { id, value, quality }
    }
}

/// A bundle of entries sharing one reference timestamp
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct VariableBatch {
    /// Fingerprint of the definition set the entries refer to (0 = none)
    pub reference_fingerprint: u64,
    pub base_timestamp: Timestamp,
    pub entries: Vec<VariableEntry>,
}

impl VariableBatch {
    pub fn new(reference_fingerprint: u64, base_timestamp: Timestamp) -> Self {
        VariableBatch {
            reference_fingerprint,
            base_timestamp,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: VariableEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    pub fn encode_into(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        buf.reserve(24 + self.entries.len() * (ITEM_HEADER_SIZE + 8));
        buf.put_u64_le(self.reference_fingerprint);
        put_timestamp(buf, self.base_timestamp);
        put_count(buf, self.entries.len())?;

        for entry in &self.entries {
            buf.put_u32_le(entry.id.0);
            buf.put_u8(entry.quality.to_byte());
            put_timestamp(buf, self.base_timestamp);
            buf.put_u8(entry.value.tag);
            put_count(buf, entry.value.data.len())?;
            buf.put_slice(&entry.value.data);
        }
        Ok(())
    }

    pub fn decode_from(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        let reference_fingerprint = r.u64()?;
        let base_timestamp = read_timestamp(r)?;
        let count = r.count(ITEM_HEADER_SIZE)?;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let id = VariableId(r.u32()?);
            // Unknown quality codes degrade rather than fail the batch
            let quality = Quality::from_byte(r.u8()?).unwrap_or(Quality::Uncertain);
            let _item_timestamp = read_timestamp(r)?;
            let tag = r.u8()?;
            let len = r.u32()? as usize;
            let data = Bytes::copy_from_slice(r.bytes(len)?);
            entries.push(VariableEntry {
                id,
                value: EncodedValue { tag, data },
                quality,
            });
        }

        Ok(VariableBatch {
            reference_fingerprint,
            base_timestamp,
            entries,
        })
    }
}

pub(crate) fn put_timestamp(buf: &mut BytesMut, ts: Timestamp) {
    buf.put_i64_le(ts.seconds());
    buf.put_u32_le(ts.subsec_nanos());
}

pub(crate) fn read_timestamp(r: &mut WireReader<'_>) -> VarsyncResult<Timestamp> {
    let seconds = r.i64()?;
    let nanos = r.u32()?;
    Ok(Timestamp::from_parts(seconds, nanos))
}
