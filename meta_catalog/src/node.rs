//! Nodes of the schema tree.

use std::collections::BTreeMap;

use crate::schema::MeasurementSchema;

/// One node of the schema tree: an internal branch, a storage group, or a
/// measurement leaf. Children are owned by their parent; a leaf never has
/// children.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Internal(InternalNode),
    StorageGroup(StorageGroupNode),
    Leaf(LeafNode),
}

#[derive(Debug, Clone)]
pub struct InternalNode {
    pub(crate) name: String,
    pub(crate) children: BTreeMap<String, SchemaNode>,
}

#[derive(Debug, Clone)]
pub struct StorageGroupNode {
    pub(crate) name: String,
    pub(crate) children: BTreeMap<String, SchemaNode>,
    /// Retention in milliseconds; 0 keeps data forever.
    pub(crate) data_ttl: u64,
}

#[derive(Debug, Clone)]
pub struct LeafNode {
    pub(crate) name: String,
    pub(crate) schema: MeasurementSchema,
    pub(crate) alias: Option<String>,
    /// Byte offset of the tag/attribute record in the tag file, if any.
    pub(crate) tag_offset: Option<u64>,
}

impl SchemaNode {
    pub(crate) fn internal(name: impl Into<String>) -> Self {
        Self::Internal(InternalNode {
            name: name.into(),
            children: BTreeMap::new(),
        })
    }

    pub(crate) fn storage_group(name: impl Into<String>, data_ttl: u64) -> Self {
        Self::StorageGroup(StorageGroupNode {
            name: name.into(),
            children: BTreeMap::new(),
            data_ttl,
        })
    }

    pub(crate) fn leaf(
        name: impl Into<String>,
        schema: MeasurementSchema,
        alias: Option<String>,
    ) -> Self {
        Self::Leaf(LeafNode {
            name: name.into(),
            schema,
            alias,
            tag_offset: None,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Internal(node) => &node.name,
            Self::StorageGroup(node) => &node.name,
            Self::Leaf(node) => &node.name,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, SchemaNode>> {
        match self {
            Self::Internal(node) => Some(&node.children),
            Self::StorageGroup(node) => Some(&node.children),
            Self::Leaf(_) => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut BTreeMap<String, SchemaNode>> {
        match self {
            Self::Internal(node) => Some(&mut node.children),
            Self::StorageGroup(node) => Some(&mut node.children),
            Self::Leaf(_) => None,
        }
    }

    pub fn is_storage_group(&self) -> bool {
        matches!(self, Self::StorageGroup(_))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    pub fn as_storage_group(&self) -> Option<&StorageGroupNode> {
        match self {
            Self::StorageGroup(group) => Some(group),
            _ => None,
        }
    }
}

impl StorageGroupNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_ttl(&self) -> u64 {
        self.data_ttl
    }
}

impl LeafNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &MeasurementSchema {
        &self.schema
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn tag_offset(&self) -> Option<u64> {
        self.tag_offset
    }
}
