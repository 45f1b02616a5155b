//! The in-memory schema tree: every storage group, device, and measurement
//! the catalog knows about, addressed by dotted path.
//!
//! A path may use `*` as a wildcard segment. Anywhere but the final segment
//! it matches exactly one level; as the final segment it matches any suffix
//! down to the leaves. A concrete pattern that is shorter than a stored path
//! is a prefix and matches everything below it.

use std::collections::{BTreeSet, HashMap};

use crate::node::{LeafNode, SchemaNode, StorageGroupNode};
use crate::path::{self, PATH_ROOT, PATH_SEPARATOR, PATH_WILDCARD, TIME_COLUMN_NAME};
use crate::schema::{CompressionType, MeasurementSchema, TsDataType, TsEncoding};
use crate::{MetadataError, Result};

/// One measurement row produced by [`SchemaTree::measurements`].
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementInfo {
    pub path: String,
    pub alias: Option<String>,
    pub storage_group: String,
    pub data_type: TsDataType,
    pub encoding: TsEncoding,
    pub compressor: CompressionType,
    pub tag_offset: Option<u64>,
}

#[derive(Debug)]
pub struct SchemaTree {
    root: SchemaNode,
}

impl Default for SchemaTree {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct SeriesRemoval {
    leaf: LeafNode,
    emptied_group: Option<String>,
    prune: bool,
}

#[derive(Debug)]
struct MeasurementCollector {
    rows: Vec<MeasurementInfo>,
    to_skip: usize,
    // None is unbounded
    remaining: Option<usize>,
}

impl MeasurementCollector {
    fn full(&self) -> bool {
        self.remaining == Some(0)
    }
}

impl SchemaTree {
    pub fn new() -> Self {
        Self {
            root: SchemaNode::internal(PATH_ROOT),
        }
    }

    /// Convert the node at `path` into a storage group, creating internal
    /// nodes on the way down. No storage group may exist above, at, or below
    /// the target.
    pub fn set_storage_group(&mut self, path: &str) -> Result<()> {
        let segments = path::split_path(path)?;
        if segments.len() <= 1 {
            return Err(MetadataError::illegal_path(path));
        }
        let mut cur = &mut self.root;
        let mut walked = String::from(PATH_ROOT);
        for name in &segments[1..segments.len() - 1] {
            let children = cur
                .children_mut()
                .ok_or_else(|| MetadataError::path_already_exist(walked.clone()))?;
            let child = children
                .entry((*name).to_string())
                .or_insert_with(|| SchemaNode::internal(*name));
            walked.push(PATH_SEPARATOR);
            walked.push_str(name);
            if child.is_storage_group() {
                return Err(MetadataError::storage_group_already_set(walked));
            }
            cur = child;
        }
        let children = cur
            .children_mut()
            .ok_or_else(|| MetadataError::path_already_exist(walked))?;
        let group_name = segments[segments.len() - 1];
        // an existing terminal node means a group already lives at or below it
        if children.contains_key(group_name) {
            return Err(MetadataError::storage_group_already_set(path));
        }
        children.insert(
            group_name.to_string(),
            SchemaNode::storage_group(group_name, 0),
        );
        Ok(())
    }

    /// Remove the storage group at `path` with its whole subtree, then prune
    /// ancestors left childless, up to but excluding root.
    pub fn delete_storage_group(&mut self, path: &str) -> Result<()> {
        let segments = path::split_path(path)?;
        if segments.len() <= 1 {
            return Err(MetadataError::illegal_path(path));
        }
        Self::remove_group(&mut self.root, &segments[1..], path)?;
        Ok(())
    }

    // Returns whether `node` lost its last child and should be pruned by its
    // parent.
    fn remove_group(node: &mut SchemaNode, rest: &[&str], full: &str) -> Result<bool> {
        let Some(children) = node.children_mut() else {
            return Err(MetadataError::path_not_exist(full));
        };
        let name = rest[0];
        if rest.len() == 1 {
            match children.get(name) {
                Some(SchemaNode::StorageGroup(_)) => {
                    children.remove(name);
                }
                Some(_) => return Err(MetadataError::storage_group_not_set(full)),
                None => return Err(MetadataError::path_not_exist(full)),
            }
        } else {
            let child = children
                .get_mut(name)
                .ok_or_else(|| MetadataError::path_not_exist(full))?;
            if Self::remove_group(child, &rest[1..], full)? {
                children.remove(name);
            }
        }
        Ok(children.is_empty())
    }

    /// Attach a measurement leaf at `path`, creating internal nodes below the
    /// storage group as needed. An ancestor storage group must already exist.
    pub fn create_time_series(
        &mut self,
        path: &str,
        schema: MeasurementSchema,
        alias: Option<String>,
    ) -> Result<()> {
        let segments = path::split_path(path)?;
        if segments.len() <= 2 {
            return Err(MetadataError::illegal_path(path));
        }
        let leaf_name = segments[segments.len() - 1];
        if leaf_name == TIME_COLUMN_NAME {
            return Err(MetadataError::illegal_path(path));
        }
        // demand the ancestor group before touching the tree
        self.storage_group_name(path)?;

        let mut cur = &mut self.root;
        let mut walked = String::from(PATH_ROOT);
        for name in &segments[1..segments.len() - 1] {
            let children = cur
                .children_mut()
                .ok_or_else(|| MetadataError::path_already_exist(walked.clone()))?;
            cur = children
                .entry((*name).to_string())
                .or_insert_with(|| SchemaNode::internal(*name));
            walked.push(PATH_SEPARATOR);
            walked.push_str(name);
        }
        let children = cur
            .children_mut()
            .ok_or_else(|| MetadataError::path_already_exist(walked.clone()))?;
        if children.contains_key(leaf_name) {
            return Err(MetadataError::path_already_exist(path));
        }
        if let Some(alias_name) = &alias {
            if children.contains_key(alias_name) {
                return Err(MetadataError::path_already_exist(format!(
                    "{walked}{PATH_SEPARATOR}{alias_name}"
                )));
            }
        }
        children.insert(leaf_name.to_string(), SchemaNode::leaf(leaf_name, schema, alias));
        Ok(())
    }

    /// Detach the leaf at `path` and prune emptied ancestors up to, but not
    /// including, the storage group. Returns the storage group's name when
    /// the deletion left it without any series, along with the detached leaf.
    pub fn delete_time_series(&mut self, path: &str) -> Result<(Option<String>, LeafNode)> {
        let segments = path::split_path(path)?;
        if segments.len() <= 1 {
            return Err(MetadataError::path_not_exist(path));
        }
        let removal = Self::remove_series(&mut self.root, PATH_ROOT, &segments[1..], path)?;
        Ok((removal.emptied_group, removal.leaf))
    }

    fn remove_series(
        node: &mut SchemaNode,
        node_path: &str,
        rest: &[&str],
        full: &str,
    ) -> Result<SeriesRemoval> {
        let Some(children) = node.children_mut() else {
            return Err(MetadataError::path_not_exist(full));
        };
        let name = rest[0];
        let child_path = format!("{node_path}{PATH_SEPARATOR}{name}");
        if rest.len() == 1 {
            if !matches!(children.get(name), Some(SchemaNode::Leaf(_))) {
                return Err(MetadataError::path_not_exist(full));
            }
            let Some(SchemaNode::Leaf(leaf)) = children.remove(name) else {
                return Err(MetadataError::path_not_exist(full));
            };
            Ok(SeriesRemoval {
                leaf,
                emptied_group: None,
                prune: children.is_empty(),
            })
        } else {
            let child = children
                .get_mut(name)
                .ok_or_else(|| MetadataError::path_not_exist(full))?;
            let mut removal = Self::remove_series(child, &child_path, &rest[1..], full)?;
            if removal.prune {
                if child.is_storage_group() {
                    // an emptied storage group stays in the tree; report it
                    removal.emptied_group = Some(child_path);
                    removal.prune = false;
                } else {
                    children.remove(name);
                    removal.prune = children.is_empty();
                }
            }
            Ok(removal)
        }
    }

    /// The storage-group prefix of `path`.
    pub fn storage_group_name(&self, path: &str) -> Result<String> {
        let segments = path::split_path(path)?;
        let mut cur = &self.root;
        let mut walked = String::from(PATH_ROOT);
        for name in &segments[1..] {
            let child = cur
                .children()
                .and_then(|children| children.get(*name))
                .ok_or_else(|| MetadataError::storage_group_not_set(path))?;
            walked.push(PATH_SEPARATOR);
            walked.push_str(name);
            if child.is_storage_group() {
                return Ok(walked);
            }
            cur = child;
        }
        Err(MetadataError::storage_group_not_set(path))
    }

    pub fn all_storage_group_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        Self::collect_group_names(&self.root, PATH_ROOT.to_string(), &mut names);
        names
    }

    fn collect_group_names(node: &SchemaNode, node_path: String, out: &mut Vec<String>) {
        if node.is_storage_group() {
            out.push(node_path);
            return;
        }
        if let Some(children) = node.children() {
            for (name, child) in children {
                Self::collect_group_names(
                    child,
                    format!("{node_path}{PATH_SEPARATOR}{name}"),
                    out,
                );
            }
        }
    }

    pub fn storage_group_node(&self, path: &str) -> Result<&StorageGroupNode> {
        self.node(path)?
            .as_storage_group()
            .ok_or_else(|| MetadataError::storage_group_not_set(path))
    }

    /// Update the retention of the storage group at `path`.
    pub fn set_ttl(&mut self, path: &str, data_ttl: u64) -> Result<()> {
        match self.node_mut(path)? {
            SchemaNode::StorageGroup(group) => {
                group.data_ttl = data_ttl;
                Ok(())
            }
            _ => Err(MetadataError::storage_group_not_set(path)),
        }
    }

    pub fn node(&self, path: &str) -> Result<&SchemaNode> {
        let segments = path::split_path(path)?;
        let mut cur = &self.root;
        for name in &segments[1..] {
            cur = cur
                .children()
                .and_then(|children| children.get(*name))
                .ok_or_else(|| MetadataError::path_not_exist(path))?;
        }
        Ok(cur)
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut SchemaNode> {
        let segments = path::split_path(path)?;
        let mut cur = &mut self.root;
        for name in &segments[1..] {
            cur = cur
                .children_mut()
                .and_then(|children| children.get_mut(*name))
                .ok_or_else(|| MetadataError::path_not_exist(path))?;
        }
        Ok(cur)
    }

    /// Resolve `path`, demanding that the walk crosses a storage group.
    /// Falling off the tree before crossing one reports the missing group;
    /// after it, the missing path.
    pub fn node_with_storage_group_check(&self, path: &str) -> Result<&SchemaNode> {
        let segments = path::split_path(path)?;
        let mut cur = &self.root;
        let mut crossed_group = false;
        for name in &segments[1..] {
            match cur.children().and_then(|children| children.get(*name)) {
                Some(child) => {
                    if child.is_storage_group() {
                        crossed_group = true;
                    }
                    cur = child;
                }
                None if crossed_group => return Err(MetadataError::path_not_exist(path)),
                None => return Err(MetadataError::storage_group_not_set(path)),
            }
        }
        if crossed_group {
            Ok(cur)
        } else {
            Err(MetadataError::storage_group_not_set(path))
        }
    }

    /// Resolve the device at `path`, creating missing internal nodes.
    pub fn device_node_with_auto_create(&mut self, path: &str) -> Result<&SchemaNode> {
        let segments = path::split_path(path)?;
        if segments.len() <= 1 {
            return Err(MetadataError::illegal_path(path));
        }
        let mut cur = &mut self.root;
        let mut walked = String::from(PATH_ROOT);
        for name in &segments[1..] {
            let children = cur
                .children_mut()
                .ok_or_else(|| MetadataError::path_already_exist(walked.clone()))?;
            cur = children
                .entry((*name).to_string())
                .or_insert_with(|| SchemaNode::internal(*name));
            walked.push(PATH_SEPARATOR);
            walked.push_str(name);
        }
        Ok(cur)
    }

    pub fn path_exists(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }

    pub fn is_storage_group(&self, path: &str) -> bool {
        self.node(path).map_or(false, |node| node.is_storage_group())
    }

    /// Whether any node on `path` is a storage group.
    pub fn has_storage_group_on_path(&self, path: &str) -> bool {
        self.storage_group_name(path).is_ok()
    }

    pub fn schema(&self, path: &str) -> Result<&MeasurementSchema> {
        match self.node(path)? {
            SchemaNode::Leaf(leaf) => Ok(&leaf.schema),
            _ => Err(MetadataError::UnexpectedNodeKind {
                path: path.to_string(),
                expected: "measurement leaf",
            }),
        }
    }

    pub(crate) fn set_leaf_offset(&mut self, path: &str, offset: Option<u64>) -> Result<()> {
        match self.node_mut(path)? {
            SchemaNode::Leaf(leaf) => {
                leaf.tag_offset = offset;
                Ok(())
            }
            _ => Err(MetadataError::UnexpectedNodeKind {
                path: path.to_string(),
                expected: "measurement leaf",
            }),
        }
    }

    /// Number of leaves at or below the node at `path`.
    pub fn leaf_count(&self, path: &str) -> Result<usize> {
        Ok(Self::count_leaves(self.node(path)?))
    }

    fn count_leaves(node: &SchemaNode) -> usize {
        match node.children() {
            None => 1,
            Some(children) => children.values().map(Self::count_leaves).sum(),
        }
    }

    /// Every leaf path matching `pattern`, in tree-walk order.
    pub fn all_time_series_paths(&self, pattern: &str) -> Result<Vec<String>> {
        let segments = path::split_path(pattern)?;
        let mut out = Vec::new();
        Self::collect_leaf_paths(&self.root, &segments, 1, PATH_ROOT.to_string(), &mut out);
        Ok(out)
    }

    fn collect_leaf_paths(
        node: &SchemaNode,
        pattern: &[&str],
        idx: usize,
        node_path: String,
        out: &mut Vec<String>,
    ) {
        if node.is_leaf() {
            if pattern.len() <= idx {
                out.push(node_path);
            }
            return;
        }
        let Some(children) = node.children() else {
            return;
        };
        match pattern.get(idx) {
            Some(&segment) if segment != PATH_WILDCARD => {
                if let Some(child) = children.get(segment) {
                    Self::collect_leaf_paths(
                        child,
                        pattern,
                        idx + 1,
                        format!("{node_path}{PATH_SEPARATOR}{segment}"),
                        out,
                    );
                }
            }
            _ => {
                for (name, child) in children {
                    Self::collect_leaf_paths(
                        child,
                        pattern,
                        idx + 1,
                        format!("{node_path}{PATH_SEPARATOR}{name}"),
                        out,
                    );
                }
            }
        }
    }

    /// Distinct paths of parents-of-leaves matching `pattern`.
    pub fn devices(&self, pattern: &str) -> Result<BTreeSet<String>> {
        let segments = path::split_path(pattern)?;
        let mut out = BTreeSet::new();
        Self::collect_devices(&self.root, &segments, 1, PATH_ROOT.to_string(), &mut out);
        Ok(out)
    }

    fn collect_devices(
        node: &SchemaNode,
        pattern: &[&str],
        idx: usize,
        node_path: String,
        out: &mut BTreeSet<String>,
    ) {
        let Some(children) = node.children() else {
            return;
        };
        match pattern.get(idx) {
            Some(&segment) if segment != PATH_WILDCARD => {
                if let Some(child) = children.get(segment) {
                    if child.is_leaf() {
                        out.insert(node_path);
                    } else {
                        Self::collect_devices(
                            child,
                            pattern,
                            idx + 1,
                            format!("{node_path}{PATH_SEPARATOR}{segment}"),
                            out,
                        );
                    }
                }
            }
            _ => {
                for (name, child) in children {
                    if child.is_leaf() {
                        out.insert(node_path.clone());
                    } else {
                        Self::collect_devices(
                            child,
                            pattern,
                            idx + 1,
                            format!("{node_path}{PATH_SEPARATOR}{name}"),
                            out,
                        );
                    }
                }
            }
        }
    }

    /// Every node at depth `level` (root is 0) lying under the concrete
    /// `prefix`.
    pub fn nodes_at_level(&self, prefix: &str, level: usize) -> Result<Vec<String>> {
        let segments = path::split_path(prefix)?;
        if segments.contains(&PATH_WILDCARD) {
            return Err(MetadataError::illegal_path(prefix));
        }
        let node = self.node(prefix)?;
        let mut out = Vec::new();
        let depth = segments.len() - 1;
        if level >= depth {
            Self::collect_nodes_at_depth(node, prefix.to_string(), level - depth, &mut out);
        }
        Ok(out)
    }

    fn collect_nodes_at_depth(
        node: &SchemaNode,
        node_path: String,
        remaining: usize,
        out: &mut Vec<String>,
    ) {
        if remaining == 0 {
            out.push(node_path);
            return;
        }
        if let Some(children) = node.children() {
            for (name, child) in children {
                Self::collect_nodes_at_depth(
                    child,
                    format!("{node_path}{PATH_SEPARATOR}{name}"),
                    remaining - 1,
                    out,
                );
            }
        }
    }

    /// Paths of the children of the concrete node at `path`.
    pub fn child_node_paths(&self, path: &str) -> Result<BTreeSet<String>> {
        let node = self.node(path)?;
        Ok(node
            .children()
            .map(|children| {
                children
                    .keys()
                    .map(|name| format!("{path}{PATH_SEPARATOR}{name}"))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// For a possibly wildcarded `pattern`, every storage group a matching
    /// walk can reach, mapped to the pattern rewritten below that group. A
    /// non-final wildcard expands one level and disappears from the rewrite;
    /// a trailing wildcard keeps matching downward and is preserved.
    pub fn determine_storage_group(&self, pattern: &str) -> Result<HashMap<String, String>> {
        let segments = path::split_path(pattern)?;
        let mut out = HashMap::new();
        Self::determine_groups(&self.root, &segments, 1, PATH_ROOT.to_string(), &mut out);
        Ok(out)
    }

    fn determine_groups(
        node: &SchemaNode,
        pattern: &[&str],
        idx: usize,
        node_path: String,
        out: &mut HashMap<String, String>,
    ) {
        if node.is_storage_group() {
            let suffix = if idx < pattern.len() {
                pattern[idx..].join(".")
            } else if pattern.last() == Some(&PATH_WILDCARD) {
                PATH_WILDCARD.to_string()
            } else {
                String::new()
            };
            let rewritten = if suffix.is_empty() {
                node_path.clone()
            } else {
                format!("{node_path}{PATH_SEPARATOR}{suffix}")
            };
            out.insert(node_path, rewritten);
            return;
        }
        let Some(children) = node.children() else {
            return;
        };
        match pattern.get(idx) {
            Some(&segment) if segment != PATH_WILDCARD => {
                if let Some(child) = children.get(segment) {
                    Self::determine_groups(
                        child,
                        pattern,
                        idx + 1,
                        format!("{node_path}{PATH_SEPARATOR}{segment}"),
                        out,
                    );
                }
            }
            Some(_) => {
                for (name, child) in children {
                    Self::determine_groups(
                        child,
                        pattern,
                        idx + 1,
                        format!("{node_path}{PATH_SEPARATOR}{name}"),
                        out,
                    );
                }
            }
            None => {
                // a trailing wildcard keeps matching below the pattern's end
                if pattern.last() == Some(&PATH_WILDCARD) {
                    for (name, child) in children {
                        Self::determine_groups(
                            child,
                            pattern,
                            idx,
                            format!("{node_path}{PATH_SEPARATOR}{name}"),
                            out,
                        );
                    }
                }
            }
        }
    }

    /// Measurement rows matching `prefix` in tree-walk order, skipping the
    /// first `offset` matches and taking at most `limit` (0 is unbounded).
    pub fn measurements(
        &self,
        prefix: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<MeasurementInfo>> {
        let pattern = path::split_path(prefix)?;
        let mut collector = MeasurementCollector {
            rows: Vec::new(),
            to_skip: offset,
            remaining: (limit != 0).then_some(limit),
        };
        Self::collect_measurements(
            &self.root,
            &pattern,
            1,
            PATH_ROOT.to_string(),
            None,
            &mut collector,
        );
        Ok(collector.rows)
    }

    fn collect_measurements(
        node: &SchemaNode,
        pattern: &[&str],
        idx: usize,
        node_path: String,
        group: Option<&str>,
        collector: &mut MeasurementCollector,
    ) {
        if collector.full() {
            return;
        }
        if let SchemaNode::Leaf(leaf) = node {
            if pattern.len() <= idx {
                if collector.to_skip > 0 {
                    collector.to_skip -= 1;
                    return;
                }
                if let Some(remaining) = &mut collector.remaining {
                    *remaining -= 1;
                }
                collector.rows.push(MeasurementInfo {
                    path: node_path,
                    alias: leaf.alias.clone(),
                    storage_group: group.unwrap_or_default().to_string(),
                    data_type: leaf.schema.data_type,
                    encoding: leaf.schema.encoding,
                    compressor: leaf.schema.compressor,
                    tag_offset: leaf.tag_offset,
                });
            }
            return;
        }
        let group = if node.is_storage_group() {
            Some(node_path.as_str())
        } else {
            group
        };
        let Some(children) = node.children() else {
            return;
        };
        match pattern.get(idx) {
            Some(&segment) if segment != PATH_WILDCARD => {
                if let Some(child) = children.get(segment) {
                    Self::collect_measurements(
                        child,
                        pattern,
                        idx + 1,
                        format!("{node_path}{PATH_SEPARATOR}{segment}"),
                        group,
                        collector,
                    );
                }
            }
            _ => {
                for (name, child) in children {
                    Self::collect_measurements(
                        child,
                        pattern,
                        idx + 1,
                        format!("{node_path}{PATH_SEPARATOR}{name}"),
                        group,
                        collector,
                    );
                }
            }
        }
    }
}
