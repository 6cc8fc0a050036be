// # Node Kinds
//
// The closed set of record kinds and their fixed-slot layouts. The layout
// table is a plain array indexed by discriminant; there is no dynamic
// dispatch on the read or write path.

use serde::{Deserialize, Serialize};

/// All record kinds stored in record pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeKind {
    Element = 0,
    Attribute = 1,
    Namespace = 2,
    Text = 3,
    Comment = 4,
    ProcessingInstruction = 5,
    Document = 6,
    Object = 7,
    ObjectKey = 8,
    Array = 9,
    StringValue = 10,
    NumberValue = 11,
    BooleanValue = 12,
    NullValue = 13,
    PathNode = 14,
    DeweyIdMapping = 15,
}

pub const NODE_KIND_COUNT: usize = 16;

impl NodeKind {
    pub fn from_u8(value: u8) -> Option<NodeKind> {
        match value {
            0 => Some(NodeKind::Element),
            1 => Some(NodeKind::Attribute),
            2 => Some(NodeKind::Namespace),
            3 => Some(NodeKind::Text),
            4 => Some(NodeKind::Comment),
            5 => Some(NodeKind::ProcessingInstruction),
            6 => Some(NodeKind::Document),
            7 => Some(NodeKind::Object),
            8 => Some(NodeKind::ObjectKey),
            9 => Some(NodeKind::Array),
            10 => Some(NodeKind::StringValue),
            11 => Some(NodeKind::NumberValue),
            12 => Some(NodeKind::BooleanValue),
            13 => Some(NodeKind::NullValue),
            14 => Some(NodeKind::PathNode),
            15 => Some(NodeKind::DeweyIdMapping),
            _ => None,
        }
    }

    /// The fixed-slot layout of this kind.
    #[inline(always)]
    pub fn layout(self) -> &'static NodeKindLayout {
        &LAYOUTS[self as usize]
    }
}

/// One fixed-width structural field inside a slot header.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub width: u8,
}

const fn field(name: &'static str, width: u8) -> FieldSpec {
    FieldSpec { name, width }
}

/// Byte size of one payload ref: pointer (4) + length (4) + flags (2).
pub const PAYLOAD_REF_LEN: usize = 10;

/// Packed layout of one node kind: structural fields in write order, then
/// `payload_refs` payload-ref triples, then inline payload bytes.
#[derive(Debug)]
pub struct NodeKindLayout {
    pub fields: &'static [FieldSpec],
    pub payload_refs: usize,
}

impl NodeKindLayout {
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Byte offset of field `index` from the start of the slot.
    pub fn field_offset(&self, index: usize) -> usize {
        self.fields[..index]
            .iter()
            .map(|f| f.width as usize)
            .sum()
    }

    pub fn field_width(&self, index: usize) -> usize {
        self.fields[index].width as usize
    }

    /// Total byte size of the structural fields.
    pub fn fields_len(&self) -> usize {
        self.fields.iter().map(|f| f.width as usize).sum()
    }

    /// Byte offset of payload ref `index`.
    pub fn payload_ref_offset(&self, index: usize) -> usize {
        self.fields_len() + index * PAYLOAD_REF_LEN
    }

    /// Header size: fields plus payload-ref triples. Payload bytes follow.
    pub fn header_len(&self) -> usize {
        self.fields_len() + self.payload_refs * PAYLOAD_REF_LEN
    }
}

static ELEMENT_FIELDS: [FieldSpec; 14] = [
    field("parent", 8),
    field("left_sibling", 8),
    field("right_sibling", 8),
    field("first_child", 8),
    field("last_child", 8),
    field("child_count", 8),
    field("descendant_count", 8),
    field("path_node", 8),
    field("uri_key", 4),
    field("prefix_key", 4),
    field("local_name_key", 4),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static ATTRIBUTE_FIELDS: [FieldSpec; 8] = [
    field("parent", 8),
    field("path_node", 8),
    field("uri_key", 4),
    field("prefix_key", 4),
    field("local_name_key", 4),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static NAMESPACE_FIELDS: [FieldSpec; 6] = [
    field("parent", 8),
    field("path_node", 8),
    field("uri_key", 4),
    field("prefix_key", 4),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static TEXT_FIELDS: [FieldSpec; 6] = [
    field("parent", 8),
    field("left_sibling", 8),
    field("right_sibling", 8),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static PROCESSING_INSTRUCTION_FIELDS: [FieldSpec; 8] = [
    field("parent", 8),
    field("left_sibling", 8),
    field("right_sibling", 8),
    field("path_node", 8),
    field("local_name_key", 4),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static DOCUMENT_FIELDS: [FieldSpec; 6] = [
    field("first_child", 8),
    field("child_count", 8),
    field("descendant_count", 8),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static OBJECT_FIELDS: [FieldSpec; 10] = [
    field("parent", 8),
    field("left_sibling", 8),
    field("right_sibling", 8),
    field("first_child", 8),
    field("last_child", 8),
    field("child_count", 8),
    field("descendant_count", 8),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static OBJECT_KEY_FIELDS: [FieldSpec; 9] = [
    field("parent", 8),
    field("left_sibling", 8),
    field("right_sibling", 8),
    field("first_child", 8),
    field("path_node", 8),
    field("name_key", 4),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static VALUE_FIELDS: [FieldSpec; 6] = [
    field("parent", 8),
    field("left_sibling", 8),
    field("right_sibling", 8),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static BOOLEAN_VALUE_FIELDS: [FieldSpec; 7] = [
    field("parent", 8),
    field("left_sibling", 8),
    field("right_sibling", 8),
    field("boolean", 1),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static PATH_NODE_FIELDS: [FieldSpec; 13] = [
    field("parent", 8),
    field("left_sibling", 8),
    field("right_sibling", 8),
    field("first_child", 8),
    field("uri_key", 4),
    field("prefix_key", 4),
    field("local_name_key", 4),
    field("level", 4),
    field("references", 4),
    field("kind", 1),
    field("hash", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static DEWEY_ID_MAPPING_FIELDS: [FieldSpec; 3] = [
    field("record_key", 8),
    field("previous_revision", 4),
    field("last_modified_revision", 4),
];

static LAYOUTS: [NodeKindLayout; NODE_KIND_COUNT] = [
    // Element: attribute vector + namespace vector
    NodeKindLayout {
        fields: &ELEMENT_FIELDS,
        payload_refs: 2,
    },
    // Attribute: value blob
    NodeKindLayout {
        fields: &ATTRIBUTE_FIELDS,
        payload_refs: 1,
    },
    // Namespace
    NodeKindLayout {
        fields: &NAMESPACE_FIELDS,
        payload_refs: 0,
    },
    // Text: value blob
    NodeKindLayout {
        fields: &TEXT_FIELDS,
        payload_refs: 1,
    },
    // Comment: value blob
    NodeKindLayout {
        fields: &TEXT_FIELDS,
        payload_refs: 1,
    },
    // ProcessingInstruction: value blob
    NodeKindLayout {
        fields: &PROCESSING_INSTRUCTION_FIELDS,
        payload_refs: 1,
    },
    // Document
    NodeKindLayout {
        fields: &DOCUMENT_FIELDS,
        payload_refs: 0,
    },
    // Object
    NodeKindLayout {
        fields: &OBJECT_FIELDS,
        payload_refs: 0,
    },
    // ObjectKey
    NodeKindLayout {
        fields: &OBJECT_KEY_FIELDS,
        payload_refs: 0,
    },
    // Array
    NodeKindLayout {
        fields: &OBJECT_FIELDS,
        payload_refs: 0,
    },
    // StringValue: value blob
    NodeKindLayout {
        fields: &VALUE_FIELDS,
        payload_refs: 1,
    },
    // NumberValue: number encoding
    NodeKindLayout {
        fields: &VALUE_FIELDS,
        payload_refs: 1,
    },
    // BooleanValue
    NodeKindLayout {
        fields: &BOOLEAN_VALUE_FIELDS,
        payload_refs: 0,
    },
    // NullValue
    NodeKindLayout {
        fields: &VALUE_FIELDS,
        payload_refs: 0,
    },
    // PathNode
    NodeKindLayout {
        fields: &PATH_NODE_FIELDS,
        payload_refs: 0,
    },
    // DeweyIdMapping: dewey id bytes
    NodeKindLayout {
        fields: &DEWEY_ID_MAPPING_FIELDS,
        payload_refs: 1,
    },
];
