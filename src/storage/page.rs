//! Slotted heap page: occupancy bitmap followed by fixed-width tuple slots.
//!
//! Layout for a page of `page_size` bytes and a schema of `w` bytes per tuple:
//!
//! ```text
//! [bitmap: ceil(slots / 8) bytes][slot 0: w bytes][slot 1] ... [zero padding]
//! slots = floor(page_size * 8 / (w * 8 + 1))
//! ```
//!
//! Bit `i` of the bitmap is bit `i % 8` (least significant first) of byte `i / 8`.
//! Free slots are encoded as zeros.

use std::fmt;
use std::sync::Arc;

use crate::types::{
    PageId, RecordId, Result, TesseraError, TransactionId, Tuple, TupleDesc,
};

/// Largest supported page size in bytes.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Number of tuple slots a page of `page_size` bytes holds for `desc`.
///
/// Sizes whose bit count does not fit in `usize` report zero slots.
pub fn slot_capacity(desc: &TupleDesc, page_size: usize) -> usize {
    let bits_per_tuple = desc.byte_len().saturating_mul(8).saturating_add(1);
    page_size
        .checked_mul(8)
        .map_or(0, |page_bits| page_bits / bits_per_tuple)
}

/// Bytes of occupancy bitmap needed for `slots` slots.
pub fn header_len(slots: usize) -> usize {
    slots.div_ceil(8)
}

/// An all-free page image.
pub fn empty_page_bytes(page_size: usize) -> Vec<u8> {
    vec![0u8; page_size]
}

/// A decoded heap page together with its schema.
#[derive(Clone)]
pub struct HeapPage {
    id: PageId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    slots: Vec<Option<Tuple>>,
    dirtied_by: Option<TransactionId>,
}

impl HeapPage {
    /// Creates a page with every slot free.
    pub fn empty(id: PageId, desc: Arc<TupleDesc>, page_size: usize) -> Result<Self> {
        let capacity = slot_capacity(&desc, page_size);
        if capacity == 0 {
            return Err(TesseraError::Invalid("tuple does not fit in a page"));
        }
        if capacity > u16::MAX as usize + 1 {
            return Err(TesseraError::Invalid("page holds more slots than a record id can address"));
        }
        Ok(Self {
            id,
            desc,
            page_size,
            slots: vec![None; capacity],
            dirtied_by: None,
        })
    }

    /// Decodes a page image. `bytes` must be exactly `page_size` long.
    pub fn decode(id: PageId, desc: Arc<TupleDesc>, page_size: usize, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != page_size {
            return Err(TesseraError::Corruption("page image has wrong length"));
        }
        let mut page = Self::empty(id, desc, page_size)?;
        let width = page.desc.byte_len();
        let body = header_len(page.slots.len());
        for slot in 0..page.slots.len() {
            if bytes[slot / 8] & (1 << (slot % 8)) == 0 {
                continue;
            }
            let start = body + slot * width;
            let mut tuple = Tuple::decode(&page.desc, &bytes[start..start + width])?;
            tuple.set_record_id(Some(RecordId::new(id, slot as u16)));
            page.slots[slot] = Some(tuple);
        }
        Ok(page)
    }

    /// Encodes the page into a `page_size` byte image.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = empty_page_bytes(self.page_size);
        let width = self.desc.byte_len();
        let body = header_len(self.slots.len());
        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(tuple) = entry {
                out[slot / 8] |= 1 << (slot % 8);
                let start = body + slot * width;
                tuple.encode_into(&mut out[start..start + width])?;
            }
        }
        Ok(out)
    }

    /// Identity of this page.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Schema of the tuples stored here.
    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Total number of slots.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Number of free slots.
    pub fn num_empty_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    /// Returns true if `slot` holds a tuple.
    pub fn is_slot_used(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Some(_)))
    }

    /// Tuple stored at `slot`, if any.
    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Occupied slots in ascending slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Stores `tuple` in the first free slot and stamps its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> Result<RecordId> {
        self.desc.check(tuple.fields())?;
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(TesseraError::Invalid("page has no free slot"))?;
        let rid = RecordId::new(self.id, slot as u16);
        tuple.set_record_id(Some(rid));
        self.slots[slot] = Some(tuple.clone());
        Ok(rid)
    }

    /// Frees the slot `tuple` occupies.
    ///
    /// Fails unless the tuple's record id points at this page and the slot
    /// currently stores the same field values.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let rid = tuple
            .record_id()
            .ok_or(TesseraError::Invalid("tuple has no record id"))?;
        if rid.page != self.id {
            return Err(TesseraError::TupleNotFound(rid));
        }
        let slot = rid.slot as usize;
        let stored_here = self
            .tuple(slot)
            .is_some_and(|stored| stored.fields() == tuple.fields());
        if !stored_here {
            return Err(TesseraError::TupleNotFound(rid));
        }
        self.slots[slot] = None;
        Ok(())
    }

    /// Marks the page as modified by `tid`, or clean when `None`.
    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtied_by = tid;
    }

    /// Transaction holding uncommitted changes on this page, if any.
    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }
}

impl PartialEq for HeapPage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.page_size == other.page_size
            && self.desc == other.desc
            && self.slots == other.slots
    }
}

impl fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapPage")
            .field("id", &self.id)
            .field("slots", &self.slots.len())
            .field("used", &(self.slots.len() - self.num_empty_slots()))
            .field("dirtied_by", &self.dirtied_by)
            .finish()
    }
}
