//! The metadata manager: the one entry point through which every catalog
//! read and mutation flows.
//!
//! Writers serialize behind a single process-wide reader/writer lock. A
//! mutation updates the tree first, then asks the configuration adapter to
//! absorb the capacity change (reversing the tree on a veto), persists the
//! tag/attribute payload and the operation-log line, and finally updates the
//! inverted tag index and the per-group series counters. The log line is
//! written before counters and index so that a crash in between leaves
//! nothing the next replay cannot rebuild.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, trace};

use crate::adapter::{ConfigAdapter, StorageEngine};
use crate::cache::RandomEvictCache;
use crate::config::MetaConfig;
use crate::counters::SeriesCounters;
use crate::index::TagIndex;
use crate::log::{MetaLogEntry, MetaLogWriter, META_LOG};
use crate::node::{LeafNode, SchemaNode, StorageGroupNode};
use crate::path::{self, TIME_COLUMN_NAME};
use crate::schema::{CompressionType, MeasurementSchema, TsDataType, TsEncoding};
use crate::tag_file::TagLogFile;
use crate::tree::SchemaTree;
use crate::{MetadataError, Result};

/// Everything needed to register one new time-series.
#[derive(Debug, Clone)]
pub struct CreateTimeSeriesRequest {
    pub path: String,
    pub data_type: TsDataType,
    pub encoding: TsEncoding,
    pub compressor: CompressionType,
    pub props: HashMap<String, String>,
    pub alias: Option<String>,
    /// Indexed key/value metadata.
    pub tags: HashMap<String, String>,
    /// Stored but unindexed key/value metadata.
    pub attributes: HashMap<String, String>,
}

impl CreateTimeSeriesRequest {
    pub fn new(
        path: impl Into<String>,
        data_type: TsDataType,
        encoding: TsEncoding,
        compressor: CompressionType,
    ) -> Self {
        Self {
            path: path.into(),
            data_type,
            encoding,
            compressor,
            props: HashMap::new(),
            alias: None,
            tags: HashMap::new(),
            attributes: HashMap::new(),
        }
    }
}

/// Filter applied to the inverted tag index by [`MetaManager::show_time_series`].
#[derive(Debug, Clone)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
    /// Substring match instead of exact match.
    pub contains: bool,
}

/// A time-series listing query: path prefix pattern, paging, and an optional
/// tag filter.
#[derive(Debug, Clone)]
pub struct ShowTimeSeriesQuery {
    pub prefix: String,
    /// Matches to skip before emitting rows.
    pub offset: usize,
    /// Maximum rows to emit; 0 is unbounded.
    pub limit: usize,
    pub tag_filter: Option<TagFilter>,
}

impl ShowTimeSeriesQuery {
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            offset: 0,
            limit: 0,
            tag_filter: None,
        }
    }
}

/// One row of a time-series listing; tag and attribute maps are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesRow {
    pub path: String,
    pub alias: Option<String>,
    pub storage_group: String,
    pub data_type: TsDataType,
    pub encoding: TsEncoding,
    pub compressor: CompressionType,
    pub tags: HashMap<String, String>,
}

/// The catalog façade. One instance owns the schema tree, the operation log,
/// the tag file, the inverted tag index, the per-group counters, and the
/// device-node cache; the application's top level wires exactly one.
#[derive(Debug)]
pub struct MetaManager {
    config: MetaConfig,
    adapter: Arc<dyn ConfigAdapter>,
    storage_engine: Arc<dyn StorageEngine>,
    inner: RwLock<Inner>,
    /// Device lookups bypass full tree walks through this cache. Guarded
    /// separately so load-through reads work under the catalog read lock;
    /// every writer flushes it.
    node_cache: Mutex<RandomEvictCache<String, SchemaNode>>,
}

#[derive(Debug)]
struct Inner {
    tree: SchemaTree,
    tag_file: TagLogFile,
    /// `None` while replaying: replayed operations must not re-append.
    log: Option<MetaLogWriter>,
    tag_index: TagIndex,
    counters: SeriesCounters,
}

impl MetaManager {
    /// Open the catalog rooted at `config.schema_dir`, replaying the
    /// operation log found there.
    pub fn open(
        config: MetaConfig,
        adapter: Arc<dyn ConfigAdapter>,
        storage_engine: Arc<dyn StorageEngine>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.schema_dir)?;
        let tag_file = TagLogFile::open(&config.schema_dir)?;
        let mut inner = Inner {
            tree: SchemaTree::new(),
            tag_file,
            log: None,
            tag_index: TagIndex::default(),
            counters: SeriesCounters::default(),
        };
        inner.replay(&config, adapter.as_ref(), storage_engine.as_ref())?;
        if config.enable_parameter_adapter {
            // rebuild accounting from the recovered tree
            let mut counts = Vec::new();
            for group in inner.tree.all_storage_group_names() {
                let leaves = inner.tree.leaf_count(&group)? as i64;
                counts.push((group, leaves));
            }
            inner.counters.rebuild(counts);
        }
        inner.log = Some(MetaLogWriter::open(&config.schema_dir)?);
        info!(schema_dir = %config.schema_dir.display(), "metadata catalog ready");
        let node_cache = Mutex::new(RandomEvictCache::new(config.node_cache_size));
        Ok(Self {
            config,
            adapter,
            storage_engine,
            inner: RwLock::new(inner),
            node_cache,
        })
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    /// Register a new time-series, materializing its storage group first if
    /// auto-creation is enabled.
    pub fn create_time_series(&self, request: &CreateTimeSeriesRequest) -> Result<()> {
        let mut inner = self.inner.write();
        let result = inner.create_time_series(&self.config, self.adapter.as_ref(), request, None);
        self.flush_node_cache();
        result
    }

    /// Delete every series matching `prefix`. Returns the storage groups the
    /// deletion emptied, after handing each to the storage engine.
    pub fn delete_time_series(&self, prefix: &str) -> Result<BTreeSet<String>> {
        let mut inner = self.inner.write();
        let result = inner.delete_time_series(
            &self.config,
            self.adapter.as_ref(),
            self.storage_engine.as_ref(),
            prefix,
        );
        self.flush_node_cache();
        result
    }

    pub fn set_storage_group(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let result = inner.set_storage_group(&self.config, self.adapter.as_ref(), path);
        self.flush_node_cache();
        result
    }

    pub fn delete_storage_groups(&self, paths: &[String]) -> Result<()> {
        let mut inner = self.inner.write();
        let result = inner.delete_storage_groups(&self.config, self.adapter.as_ref(), paths);
        self.flush_node_cache();
        result
    }

    /// Update the retention of the storage group at `path`.
    pub fn set_ttl(&self, path: &str, data_ttl: u64) -> Result<()> {
        let mut inner = self.inner.write();
        let result = inner.set_ttl(path, data_ttl);
        self.flush_node_cache();
        result
    }

    /// List time-series matching the query, through the inverted tag index
    /// when a tag filter is present and by tree walk otherwise.
    pub fn show_time_series(&self, query: &ShowTimeSeriesQuery) -> Result<Vec<TimeSeriesRow>> {
        let inner = self.inner.read();
        match &query.tag_filter {
            Some(filter) => inner.show_by_tag(&self.config, query, filter),
            None => inner.show_by_tree(&self.config, query),
        }
    }

    pub fn time_series_paths(&self, pattern: &str) -> Result<Vec<String>> {
        self.inner.read().tree.all_time_series_paths(pattern)
    }

    pub fn devices(&self, pattern: &str) -> Result<BTreeSet<String>> {
        self.inner.read().tree.devices(pattern)
    }

    pub fn nodes_at_level(&self, prefix: &str, level: usize) -> Result<Vec<String>> {
        self.inner.read().tree.nodes_at_level(prefix, level)
    }

    pub fn storage_group_name(&self, path: &str) -> Result<String> {
        self.inner.read().tree.storage_group_name(path)
    }

    pub fn storage_group_names(&self) -> Vec<String> {
        self.inner.read().tree.all_storage_group_names()
    }

    pub fn storage_group_node(&self, path: &str) -> Result<StorageGroupNode> {
        Ok(self.inner.read().tree.storage_group_node(path)?.clone())
    }

    pub fn determine_storage_group(&self, pattern: &str) -> Result<HashMap<String, String>> {
        self.inner.read().tree.determine_storage_group(pattern)
    }

    pub fn node(&self, path: &str) -> Result<SchemaNode> {
        Ok(self.inner.read().tree.node(path)?.clone())
    }

    pub fn child_node_paths(&self, path: &str) -> Result<BTreeSet<String>> {
        self.inner.read().tree.child_node_paths(path)
    }

    pub fn path_exists(&self, path: &str) -> bool {
        self.inner.read().tree.path_exists(path)
    }

    pub fn is_storage_group(&self, path: &str) -> bool {
        self.inner.read().tree.is_storage_group(path)
    }

    /// Whether any node on `path` is a storage group.
    pub fn has_storage_group(&self, path: &str) -> bool {
        self.inner.read().tree.has_storage_group_on_path(path)
    }

    /// Value type of the series at `path`; the reserved time column is
    /// always `Int64`.
    pub fn series_type(&self, path: &str) -> Result<TsDataType> {
        if path == TIME_COLUMN_NAME {
            return Ok(TsDataType::Int64);
        }
        Ok(self.inner.read().tree.schema(path)?.data_type)
    }

    /// Measurement schemas for named children of a device node.
    pub fn measurement_schemas(
        &self,
        device: &str,
        measurements: &[&str],
    ) -> Result<Vec<MeasurementSchema>> {
        let inner = self.inner.read();
        let node = inner.tree.node(device)?;
        let mut schemas = Vec::with_capacity(measurements.len());
        for measurement in measurements {
            let child = node
                .children()
                .and_then(|children| children.get(*measurement))
                .ok_or_else(|| {
                    MetadataError::path_not_exist(format!("{device}.{measurement}"))
                })?;
            let leaf = child.as_leaf().ok_or_else(|| MetadataError::UnexpectedNodeKind {
                path: format!("{device}.{measurement}"),
                expected: "measurement leaf",
            })?;
            schemas.push(leaf.schema().clone());
        }
        Ok(schemas)
    }

    /// Resolve a device node, loading through the cache. On a miss with
    /// auto-creation enabled the storage group is materialized at the
    /// configured level and the internal chain created; a storage group
    /// materialized concurrently by another writer is not an error.
    pub fn device_node_with_auto_create(&self, device: &str) -> Result<SchemaNode> {
        let miss;
        {
            let inner = self.inner.read();
            if let Some(node) = self.node_cache.lock().get(&device.to_string()) {
                return Ok(node);
            }
            match inner.tree.node_with_storage_group_check(device) {
                Ok(node) => {
                    let node = node.clone();
                    self.node_cache.lock().insert(device.to_string(), node.clone());
                    return Ok(node);
                }
                Err(e) => miss = e,
            }
        }
        if !self.config.auto_create_schema_enabled {
            return Err(miss);
        }
        let mut inner = self.inner.write();
        if matches!(miss, MetadataError::StorageGroupNotSet { .. }) {
            let group =
                path::storage_group_name_by_level(device, self.config.default_storage_group_level)?;
            match inner.set_storage_group(&self.config, self.adapter.as_ref(), &group) {
                // set concurrently between our read and write sections
                Ok(()) | Err(MetadataError::StorageGroupAlreadySet { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        let node = inner.tree.device_node_with_auto_create(device)?.clone();
        self.flush_node_cache();
        Ok(node)
    }

    /// Series registered in `storage_group`, if accounting is enabled and
    /// the group exists.
    pub fn series_count(&self, storage_group: &str) -> Option<i64> {
        self.inner.read().counters.count(storage_group)
    }

    /// The largest per-group series count, 0 with no groups.
    pub fn max_series_count(&self) -> i64 {
        self.inner.read().counters.max()
    }

    // Every writer flushes the cache: a cached device snapshot must not
    // outlive a mutation that could reshape its branch.
    fn flush_node_cache(&self) {
        let mut cache = self.node_cache.lock();
        if cache.len() > 0 {
            trace!(entries = cache.len(), "flushing device-node cache");
        }
        cache.clear();
    }
}

impl Inner {
    fn append_log(&mut self, entry: &MetaLogEntry) -> Result<()> {
        if let Some(log) = &mut self.log {
            log.append(entry)?;
        }
        Ok(())
    }

    fn replay(
        &mut self,
        config: &MetaConfig,
        adapter: &dyn ConfigAdapter,
        storage_engine: &dyn StorageEngine,
    ) -> Result<()> {
        let log_path = config.schema_dir.join(META_LOG);
        if !log_path.exists() {
            return Ok(());
        }
        let reader = BufReader::new(File::open(&log_path)?);
        let mut applied = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let outcome = MetaLogEntry::parse(&line)
                .and_then(|entry| self.apply(config, adapter, storage_engine, entry));
            match outcome {
                Ok(()) => applied += 1,
                // a bad line is skipped; recovery carries on
                Err(e) => error!(line = %line, error = %e, "cannot replay metadata log entry"),
            }
        }
        info!(applied, "metadata log replayed");
        Ok(())
    }

    fn apply(
        &mut self,
        config: &MetaConfig,
        adapter: &dyn ConfigAdapter,
        storage_engine: &dyn StorageEngine,
        entry: MetaLogEntry,
    ) -> Result<()> {
        match entry {
            MetaLogEntry::CreateTimeSeries {
                path,
                data_type,
                encoding,
                compressor,
                props,
                alias,
                tag_offset,
            } => {
                let tags = match tag_offset {
                    Some(offset) => self
                        .tag_file
                        .read_tag(config.tag_attribute_total_size, offset)?,
                    None => HashMap::new(),
                };
                let request = CreateTimeSeriesRequest {
                    path,
                    data_type,
                    encoding,
                    compressor,
                    props,
                    alias,
                    tags,
                    attributes: HashMap::new(),
                };
                self.create_time_series(config, adapter, &request, tag_offset)
            }
            MetaLogEntry::DeleteTimeSeries { path } => self
                .delete_time_series(config, adapter, storage_engine, &path)
                .map(|_| ()),
            MetaLogEntry::SetStorageGroup { path } => {
                self.set_storage_group(config, adapter, &path)
            }
            MetaLogEntry::DeleteStorageGroups { paths } => {
                self.delete_storage_groups(config, adapter, &paths)
            }
            MetaLogEntry::SetTtl { path, ttl } => self.set_ttl(&path, ttl),
        }
    }

    fn create_time_series(
        &mut self,
        config: &MetaConfig,
        adapter: &dyn ConfigAdapter,
        request: &CreateTimeSeriesRequest,
        replay_offset: Option<u64>,
    ) -> Result<()> {
        let series = &request.path;
        let storage_group = match self.tree.storage_group_name(series) {
            Ok(group) => group,
            Err(MetadataError::StorageGroupNotSet { .. }) if config.auto_create_schema_enabled => {
                let group = path::storage_group_name_by_level(
                    series,
                    config.default_storage_group_level,
                )?;
                self.set_storage_group(config, adapter, &group)?;
                group
            }
            Err(e) => return Err(e),
        };

        let schema = MeasurementSchema::new(
            request.data_type,
            request.encoding,
            request.compressor,
            request.props.clone(),
        );
        self.tree
            .create_time_series(series, schema, request.alias.clone())?;

        if config.enable_parameter_adapter {
            if let Err(veto) = adapter.adjust_time_series(1) {
                // reverse the tree mutation before surfacing the veto
                let (_, leaf) = self.tree.delete_time_series(series)?;
                self.remove_from_tag_index(config, series, &leaf)?;
                return Err(veto.into());
            }
        }

        let mut tag_offset = replay_offset;
        if self.log.is_some() {
            if !request.tags.is_empty() || !request.attributes.is_empty() {
                tag_offset = Some(self.tag_file.write(
                    config.tag_attribute_total_size,
                    &request.tags,
                    &request.attributes,
                )?);
            }
            self.append_log(&MetaLogEntry::CreateTimeSeries {
                path: series.clone(),
                data_type: request.data_type,
                encoding: request.encoding,
                compressor: request.compressor,
                props: request.props.clone(),
                alias: request.alias.clone(),
                tag_offset,
            })?;
        }
        self.tree.set_leaf_offset(series, tag_offset)?;

        if !request.tags.is_empty() {
            self.tag_index.insert(series, &request.tags);
        }
        if config.enable_parameter_adapter {
            self.counters.increment(&storage_group);
        }
        Ok(())
    }

    fn delete_time_series(
        &mut self,
        config: &MetaConfig,
        adapter: &dyn ConfigAdapter,
        storage_engine: &dyn StorageEngine,
        prefix: &str,
    ) -> Result<BTreeSet<String>> {
        let all_series = self.tree.all_time_series_paths(prefix)?;
        let mut emptied = BTreeSet::new();
        for series in &all_series {
            if let Some(group) = self.delete_one_time_series(config, adapter, series)? {
                emptied.insert(group);
            }
        }
        for group in &emptied {
            storage_engine.delete_all_data_files(group)?;
        }
        Ok(emptied)
    }

    fn delete_one_time_series(
        &mut self,
        config: &MetaConfig,
        adapter: &dyn ConfigAdapter,
        series: &str,
    ) -> Result<Option<String>> {
        let (emptied_group, leaf) = self.tree.delete_time_series(series)?;
        self.remove_from_tag_index(config, series, &leaf)?;
        self.append_log(&MetaLogEntry::DeleteTimeSeries {
            path: series.to_string(),
        })?;
        if config.enable_parameter_adapter {
            adapter.adjust_time_series(-1)?;
            // the group node survives the delete, so this still resolves
            let group = self.tree.storage_group_name(series)?;
            self.counters.decrement(&group);
        }
        Ok(emptied_group)
    }

    fn remove_from_tag_index(
        &mut self,
        config: &MetaConfig,
        series: &str,
        leaf: &LeafNode,
    ) -> Result<()> {
        let Some(offset) = leaf.tag_offset() else {
            return Ok(());
        };
        let tags = self
            .tag_file
            .read_tag(config.tag_attribute_total_size, offset)?;
        self.tag_index.remove(series, &tags);
        Ok(())
    }

    fn set_storage_group(
        &mut self,
        config: &MetaConfig,
        adapter: &dyn ConfigAdapter,
        path: &str,
    ) -> Result<()> {
        self.tree.set_storage_group(path)?;
        if config.enable_parameter_adapter {
            if let Err(veto) = adapter.adjust_storage_groups(1) {
                self.tree.delete_storage_group(path)?;
                return Err(veto.into());
            }
        }
        self.append_log(&MetaLogEntry::SetStorageGroup {
            path: path.to_string(),
        })?;
        if config.enable_parameter_adapter {
            adapter.init_counter(path);
            self.counters.register(path);
        }
        Ok(())
    }

    fn delete_storage_groups(
        &mut self,
        config: &MetaConfig,
        adapter: &dyn ConfigAdapter,
        paths: &[String],
    ) -> Result<()> {
        for path in paths {
            // take every leaf below the group out of the inverted index
            // before the subtree goes away
            let rows = self.tree.measurements(path, 0, 0)?;
            for row in rows {
                if let Some(offset) = row.tag_offset {
                    let tags = self
                        .tag_file
                        .read_tag(config.tag_attribute_total_size, offset)?;
                    self.tag_index.remove(&row.path, &tags);
                }
            }

            self.tree.delete_storage_group(path)?;
            self.append_log(&MetaLogEntry::DeleteStorageGroups {
                paths: vec![path.clone()],
            })?;

            if config.enable_parameter_adapter {
                let removed = self.counters.remove(path);
                adapter.adjust_storage_groups(-1)?;
                adapter.adjust_time_series(-(removed as i32))?;
                adapter.delete_counter(path);
            }
        }
        Ok(())
    }

    fn set_ttl(&mut self, path: &str, data_ttl: u64) -> Result<()> {
        self.tree.set_ttl(path, data_ttl)?;
        self.append_log(&MetaLogEntry::SetTtl {
            path: path.to_string(),
            ttl: data_ttl,
        })?;
        Ok(())
    }

    fn show_by_tree(
        &self,
        config: &MetaConfig,
        query: &ShowTimeSeriesQuery,
    ) -> Result<Vec<TimeSeriesRow>> {
        let rows = self
            .tree
            .measurements(&query.prefix, query.offset, query.limit)?;
        rows.into_iter()
            .map(|info| {
                let tags = self.merged_tag_map(config, info.tag_offset)?;
                Ok(TimeSeriesRow {
                    path: info.path,
                    alias: info.alias,
                    storage_group: info.storage_group,
                    data_type: info.data_type,
                    encoding: info.encoding,
                    compressor: info.compressor,
                    tags,
                })
            })
            .collect()
    }

    fn show_by_tag(
        &self,
        config: &MetaConfig,
        query: &ShowTimeSeriesQuery,
        filter: &TagFilter,
    ) -> Result<Vec<TimeSeriesRow>> {
        if !self.tag_index.contains_key(&filter.key) {
            return Err(MetadataError::NotATagKey {
                key: filter.key.clone(),
            });
        }
        let matched = self
            .tag_index
            .matching_paths(&filter.key, &filter.value, filter.contains);
        let prefix = path::split_path(&query.prefix)?;
        let limit = if query.limit == 0 {
            usize::MAX
        } else {
            query.limit
        };
        matched
            .iter()
            .filter(|series| path::matches_path_prefix(series, &prefix))
            .skip(query.offset)
            .take(limit)
            .map(|series| {
                let leaf = self
                    .tree
                    .node(series)?
                    .as_leaf()
                    .ok_or_else(|| MetadataError::UnexpectedNodeKind {
                        path: series.clone(),
                        expected: "measurement leaf",
                    })?;
                let tags = self.merged_tag_map(config, leaf.tag_offset())?;
                Ok(TimeSeriesRow {
                    path: series.clone(),
                    alias: leaf.alias().map(str::to_string),
                    storage_group: self.tree.storage_group_name(series)?,
                    data_type: leaf.schema().data_type,
                    encoding: leaf.schema().encoding,
                    compressor: leaf.schema().compressor,
                    tags,
                })
            })
            .collect()
    }

    fn merged_tag_map(
        &self,
        config: &MetaConfig,
        tag_offset: Option<u64>,
    ) -> Result<HashMap<String, String>> {
        let Some(offset) = tag_offset else {
            return Ok(HashMap::new());
        };
        let (mut tags, attributes) = self.tag_file.read(config.tag_attribute_total_size, offset)?;
        tags.extend(attributes);
        Ok(tags)
    }
}
