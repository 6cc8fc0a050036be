// # Fixed-Slot Layout Module
//
// Packed byte layouts for the record kinds stored in a frame's slot area.
// Every node kind advertises a fixed sequence of structural fields followed
// by zero or more payload refs; reading is allocation-free and writing is
// strictly ordered.

pub mod node_kind;
pub mod slot;

pub use node_kind::{FieldSpec, NodeKind, NodeKindLayout};
pub use slot::{
    FixedSlotSerializer, NodeRecord, PayloadRef, RecordSerializer, SlotReader, SlotWriter,
};
