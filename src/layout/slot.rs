// # Fixed-Slot Projector
//
// Reads and writes records inside a frame's slot area. A record is a packed
// header of fixed-width structural fields followed by payload-ref triples
// `(pointer, length, flags)` whose pointers address inline payload bytes
// after the header.
//
// Reading is allocation-free: the reader projects fields and payload slices
// straight out of the slot bytes. Writing zeroes the header, writes the
// fields strictly in layout order, then appends payload bytes while
// recording their offsets in the payload refs.

use bytes::Bytes;

use crate::error::{DbError, Result};
use crate::layout::node_kind::{NodeKind, NodeKindLayout, PAYLOAD_REF_LEN};

/// A decoded payload ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRef {
    /// Offset of the payload inside the slot data area
    pub pointer: u32,
    pub length: u32,
    pub flags: u16,
}

fn read_uint(data: &[u8], offset: usize, width: usize) -> u64 {
    let mut value = 0u64;
    for (i, byte) in data[offset..offset + width].iter().enumerate() {
        value |= (*byte as u64) << (8 * i);
    }
    value
}

fn write_uint(data: &mut [u8], offset: usize, width: usize, value: u64) {
    for i in 0..width {
        data[offset + i] = (value >> (8 * i)) as u8;
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Allocation-free projection over one record slot.
pub struct SlotReader<'a> {
    data: &'a [u8],
    layout: &'static NodeKindLayout,
}

impl<'a> SlotReader<'a> {
    pub fn new(kind: NodeKind, data: &'a [u8]) -> Result<Self> {
        let layout = kind.layout();
        if data.len() < layout.header_len() {
            return Err(DbError::InvalidArgument(format!(
                "slot of {} bytes is smaller than the {} byte header of {:?}",
                data.len(),
                layout.header_len(),
                kind
            )));
        }
        Ok(Self { data, layout })
    }

    pub fn layout(&self) -> &'static NodeKindLayout {
        self.layout
    }

    /// Structural field by layout index.
    #[inline]
    pub fn field(&self, index: usize) -> u64 {
        assert!(index < self.layout.field_count(), "field index out of range");
        read_uint(
            self.data,
            self.layout.field_offset(index),
            self.layout.field_width(index),
        )
    }

    /// Payload ref by index.
    pub fn payload_ref(&self, index: usize) -> PayloadRef {
        assert!(index < self.layout.payload_refs, "payload index out of range");
        let offset = self.layout.payload_ref_offset(index);
        PayloadRef {
            pointer: read_uint(self.data, offset, 4) as u32,
            length: read_uint(self.data, offset + 4, 4) as u32,
            flags: read_uint(self.data, offset + 8, 2) as u16,
        }
    }

    /// Payload bytes addressed by payload ref `index`.
    pub fn payload(&self, index: usize) -> Result<&'a [u8]> {
        let payload = self.payload_ref(index);
        let start = payload.pointer as usize;
        let end = start + payload.length as usize;
        if end > self.data.len() || start < self.layout.header_len() && payload.length > 0 {
            return Err(DbError::Storage(format!(
                "payload ref {} points outside the slot area ({}..{})",
                index, start, end
            )));
        }
        Ok(&self.data[start..end])
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Ordered writer for one record slot.
pub struct SlotWriter<'a> {
    data: &'a mut [u8],
    layout: &'static NodeKindLayout,
    next_field: usize,
    next_payload: usize,
    cursor: usize,
}

impl<'a> SlotWriter<'a> {
    /// Start writing a record of `kind`. Zeroes the header.
    pub fn new(kind: NodeKind, data: &'a mut [u8]) -> Result<Self> {
        let layout = kind.layout();
        let header = layout.header_len();
        if data.len() < header {
            return Err(DbError::InvalidArgument(format!(
                "slot of {} bytes cannot hold the {} byte header of {:?}",
                data.len(),
                header,
                kind
            )));
        }
        data[..header].fill(0);
        Ok(Self {
            data,
            layout,
            next_field: 0,
            next_payload: 0,
            cursor: header,
        })
    }

    /// Write the next structural field. Fields must be written in layout
    /// order and values must fit the field width.
    pub fn write_field(&mut self, value: u64) -> Result<()> {
        if self.next_field >= self.layout.field_count() {
            return Err(DbError::InvalidState(
                "all structural fields already written".into(),
            ));
        }
        let width = self.layout.field_width(self.next_field);
        if width < 8 && value >> (8 * width) != 0 {
            return Err(DbError::InvalidArgument(format!(
                "value {} does not fit the {} byte field '{}'",
                value,
                width,
                self.layout.fields[self.next_field].name
            )));
        }
        write_uint(
            self.data,
            self.layout.field_offset(self.next_field),
            width,
            value,
        );
        self.next_field += 1;
        Ok(())
    }

    /// Append payload bytes after the header and record the payload ref.
    ///
    /// All structural fields must be written first. Returns the payload's
    /// offset in the slot area.
    pub fn write_payload(&mut self, payload: &[u8], flags: u16) -> Result<u32> {
        if self.next_field != self.layout.field_count() {
            return Err(DbError::InvalidState(format!(
                "{} of {} structural fields written before payload",
                self.next_field,
                self.layout.field_count()
            )));
        }
        if self.next_payload >= self.layout.payload_refs {
            return Err(DbError::InvalidState(
                "all payload refs already written".into(),
            ));
        }
        let end = self.cursor + payload.len();
        if end > self.data.len() {
            return Err(DbError::Buffer(format!(
                "payload of {} bytes overflows the slot area",
                payload.len()
            )));
        }

        let pointer = self.cursor as u32;
        self.data[self.cursor..end].copy_from_slice(payload);

        let ref_offset = self.layout.payload_ref_offset(self.next_payload);
        write_uint(self.data, ref_offset, 4, pointer as u64);
        write_uint(self.data, ref_offset + 4, 4, payload.len() as u64);
        write_uint(self.data, ref_offset + 8, 2, flags as u64);

        debug_assert_eq!(PAYLOAD_REF_LEN, 10);
        self.next_payload += 1;
        self.cursor = end;
        Ok(pointer)
    }

    /// Bytes of the slot area used by this record.
    pub fn finish(self) -> Result<usize> {
        if self.next_field != self.layout.field_count() {
            return Err(DbError::InvalidState(format!(
                "record incomplete: {} of {} structural fields written",
                self.next_field,
                self.layout.field_count()
            )));
        }
        Ok(self.cursor)
    }
}

// ============================================================================
// Record Serializer
// ============================================================================

/// One record before projection: structural field values in layout order
/// plus payload blobs with their flags.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub kind: NodeKind,
    pub fields: Vec<u64>,
    pub payloads: Vec<(Bytes, u16)>,
}

/// Writes a record into a frame's slot memory through the fixed-slot writer.
pub trait RecordSerializer: Send + Sync {
    fn serialize(&self, record: &NodeRecord, out: &mut SlotWriter<'_>) -> Result<()>;
}

/// The default serializer: structural fields in order, payloads after.
pub struct FixedSlotSerializer;

impl RecordSerializer for FixedSlotSerializer {
    fn serialize(&self, record: &NodeRecord, out: &mut SlotWriter<'_>) -> Result<()> {
        let layout = record.kind.layout();
        if record.fields.len() != layout.field_count() {
            return Err(DbError::InvalidArgument(format!(
                "{:?} record has {} fields, layout wants {}",
                record.kind,
                record.fields.len(),
                layout.field_count()
            )));
        }
        if record.payloads.len() > layout.payload_refs {
            return Err(DbError::InvalidArgument(format!(
                "{:?} record has {} payloads, layout allows {}",
                record.kind,
                record.payloads.len(),
                layout.payload_refs
            )));
        }

        for value in &record.fields {
            out.write_field(*value)?;
        }
        for (payload, flags) in &record.payloads {
            out.write_payload(payload, *flags)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
