use std::cmp::{max, min};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use bytes::{Bytes, BytesMut};
use tracing::trace;
use crate::error::{JpipError, JpipResult};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DatabinKind {
    MainHeader,
    TileHeader,
    Precinct,
    TilePart,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DatabinId {
    pub kind: DatabinKind,
    pub in_class_id: u64,
}
impl DatabinId {
    pub fn new(kind: DatabinKind, in_class_id: u64) -> DatabinId {
        DatabinId { kind, in_class_id }
    }

    pub fn main_header() -> DatabinId {
        DatabinId::new(DatabinKind::MainHeader, 0)
    }
}
impl Display for DatabinId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.in_class_id)
    }
}

/// The cached bytes of a single databin.
///
/// Data arrives as fragments `(offset, bytes)` that may come in any order and may overlap.
///  The unbroken prefix starting at offset 0 is kept in one buffer, fragments after a gap are
///  buffered until the gap is filled. Every byte that is stored was checked against all
///  previously stored bytes at the same offsets, so the cache never holds contradicting data.
///
/// A databin never shrinks.
pub struct Databin {
    id: DatabinId,
    contiguous: BytesMut,
    pending: BTreeMap<u64, Bytes>,
    total_length: Option<u64>,
    max_pending_fragments: usize,
}

impl Databin {
    pub fn new(id: DatabinId, max_pending_fragments: usize) -> Databin {
        Databin {
            id,
            contiguous: BytesMut::new(),
            pending: Default::default(),
            total_length: None,
            max_pending_fragments,
        }
    }

    pub fn id(&self) -> DatabinId {
        self.id
    }

    /// the length of the unbroken prefix that is available for reading
    pub fn known_length(&self) -> u64 {
        self.contiguous.len() as u64
    }

    /// only known after the server sent the databin's last byte
    pub fn total_length(&self) -> Option<u64> {
        self.total_length
    }

    pub fn is_complete(&self) -> bool {
        self.total_length == Some(self.known_length())
    }

    pub fn pending_fragment_count(&self) -> usize {
        self.pending.len()
    }

    pub fn read_range(&self, start: u64, end: u64) -> JpipResult<&[u8]> {
        if start > end {
            return Err(JpipError::invalid_argument("range", format!("start {} is after end {}", start, end)));
        }
        if end > self.known_length() {
            return Err(JpipError::RangeNotAvailable { start, end, known: self.known_length() });
        }
        Ok(&self.contiguous[start as usize..end as usize])
    }

    pub fn write(&mut self, offset: u64, bytes: &[u8], is_last_byte: bool) -> JpipResult<()> {
        let end = offset.checked_add(bytes.len() as u64)
            .ok_or_else(|| JpipError::protocol_violation(format!("fragment at offset {} for databin {} exceeds 64 bits", offset, self.id)))?;

        let total_length = self.checked_total_length(end, is_last_byte)?;
        self.check_agreement(offset, bytes)?;

        let known = self.known_length();
        if offset > known {
            self.buffer_pending(offset, bytes)?;
        }
        else if end > known {
            self.contiguous.extend_from_slice(&bytes[(known - offset) as usize..]);
            self.absorb_pending();
        }
        self.total_length = total_length;
        Ok(())
    }

    fn checked_total_length(&self, end: u64, is_last_byte: bool) -> JpipResult<Option<u64>> {
        match self.total_length {
            Some(total) if is_last_byte && total != end => {
                Err(JpipError::protocol_violation(format!("databin {} ends at {}, but a previous message said it ends at {}", self.id, end, total)))
            }
            Some(total) if end > total => {
                Err(JpipError::protocol_violation(format!("data up to {} for databin {}, which ends at {}", end, self.id, total)))
            }
            None if is_last_byte => {
                let stored_end = self.pending.iter()
                    .map(|(offset, bytes)| offset + bytes.len() as u64)
                    .fold(self.known_length(), max);
                if stored_end > end {
                    return Err(JpipError::protocol_violation(format!("databin {} ends at {}, but data up to {} was received before", self.id, end, stored_end)));
                }
                Ok(Some(end))
            }
            total => Ok(total),
        }
    }

    /// Overlapping data must be identical to what is stored already
    fn check_agreement(&self, offset: u64, bytes: &[u8]) -> JpipResult<()> {
        let end = offset + bytes.len() as u64;

        let mut stored = self.pending.range(..end)
            .map(|(&o, b)| (o, &b[..]))
            .chain(std::iter::once((0, &self.contiguous[..])));

        if stored.all(|(stored_offset, stored_bytes)| Self::agree(stored_offset, stored_bytes, offset, bytes)) {
            Ok(())
        }
        else {
            Err(JpipError::protocol_violation(format!("fragment {}..{} for databin {} contradicts data received before", offset, end, self.id)))
        }
    }

    fn agree(offset_a: u64, a: &[u8], offset_b: u64, b: &[u8]) -> bool {
        let start = max(offset_a, offset_b);
        let end = min(offset_a + a.len() as u64, offset_b + b.len() as u64);
        if start >= end {
            return true;
        }
        a[(start - offset_a) as usize..(end - offset_a) as usize] == b[(start - offset_b) as usize..(end - offset_b) as usize]
    }

    fn buffer_pending(&mut self, offset: u64, bytes: &[u8]) -> JpipResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        match self.pending.get(&offset) {
            Some(existing) if existing.len() >= bytes.len() => {
                return Ok(());
            }
            None if self.pending.len() >= self.max_pending_fragments => {
                return Err(JpipError::CacheOverflow(self.id.to_string()));
            }
            _ => {}
        }

        trace!("databin {}: buffering out-of-order fragment {}..{}, {} bytes known", self.id, offset, offset + bytes.len() as u64, self.known_length());
        self.pending.insert(offset, Bytes::copy_from_slice(bytes));
        Ok(())
    }

    fn absorb_pending(&mut self) {
        while let Some(entry) = self.pending.first_entry() {
            let known = self.contiguous.len() as u64;
            let offset = *entry.key();
            if offset > known {
                break;
            }

            let bytes = entry.remove();
            let end = offset + bytes.len() as u64;
            if end > known {
                trace!("databin {}: fragment {}..{} became contiguous", self.id, offset, end);
                self.contiguous.extend_from_slice(&bytes[(known - offset) as usize..]);
            }
        }
    }
}
