use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;

use meta_catalog::adapter::{ConfigAdapter, NoopStorageEngine, StorageEngine, UnlimitedAdapter, Veto};
use meta_catalog::config::MetaConfig;
use meta_catalog::log::META_LOG;
use meta_catalog::schema::{CompressionType, TsDataType, TsEncoding};
use meta_catalog::{
    CreateTimeSeriesRequest, MetaManager, MetadataError, ShowTimeSeriesQuery, TagFilter,
};

fn open_manager(dir: &Path) -> MetaManager {
    open_with_config(MetaConfig::new(dir))
}

fn open_with_config(config: MetaConfig) -> MetaManager {
    MetaManager::open(
        config,
        Arc::new(UnlimitedAdapter),
        Arc::new(NoopStorageEngine),
    )
    .unwrap()
}

fn int32_series(path: &str) -> CreateTimeSeriesRequest {
    CreateTimeSeriesRequest::new(
        path,
        TsDataType::Int32,
        TsEncoding::Plain,
        CompressionType::Snappy,
    )
}

fn string_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Default)]
struct RecordingEngine {
    deleted: Mutex<Vec<String>>,
}

impl StorageEngine for RecordingEngine {
    fn delete_all_data_files(&self, storage_group: &str) -> std::io::Result<()> {
        self.deleted.lock().unwrap().push(storage_group.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct VetoingAdapter {
    veto_series: bool,
    veto_groups: bool,
}

impl ConfigAdapter for VetoingAdapter {
    fn adjust_time_series(&self, delta: i32) -> Result<(), Veto> {
        if self.veto_series && delta > 0 {
            Err(Veto("no capacity for another series".to_string()))
        } else {
            Ok(())
        }
    }

    fn adjust_storage_groups(&self, delta: i32) -> Result<(), Veto> {
        if self.veto_groups && delta > 0 {
            Err(Veto("no capacity for another group".to_string()))
        } else {
            Ok(())
        }
    }
}

#[test]
fn create_updates_tree_counters_and_log() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());

    manager.set_storage_group("root.sg1").unwrap();
    manager.create_time_series(&int32_series("root.sg1.d1.s1")).unwrap();

    assert!(manager.path_exists("root.sg1.d1.s1"));
    assert_eq!(manager.series_count("root.sg1"), Some(1));
    assert_eq!(manager.max_series_count(), 1);

    let log = std::fs::read_to_string(dir.path().join(META_LOG)).unwrap();
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "set_storage_group,root.sg1");
    assert_eq!(lines[1], "create_timeseries,root.sg1.d1.s1,1,0,1,,,-1");
}

#[test]
fn delete_prunes_devices_and_reports_the_emptied_group() {
    let dir = test_helpers::tmp_dir().unwrap();
    let engine = Arc::new(RecordingEngine::default());
    let manager = MetaManager::open(
        MetaConfig::new(dir.path()),
        Arc::new(UnlimitedAdapter),
        Arc::clone(&engine) as Arc<dyn StorageEngine>,
    )
    .unwrap();

    manager.set_storage_group("root.sg1").unwrap();
    manager.create_time_series(&int32_series("root.sg1.d1.s1")).unwrap();

    let emptied = manager.delete_time_series("root.sg1.d1.s1").unwrap();
    assert_eq!(emptied.into_iter().collect::<Vec<_>>(), ["root.sg1"]);

    assert!(!manager.path_exists("root.sg1.d1.s1"));
    assert!(!manager.path_exists("root.sg1.d1"));
    assert!(manager.is_storage_group("root.sg1"));
    assert_eq!(manager.series_count("root.sg1"), Some(0));
    assert_eq!(manager.max_series_count(), 0);
    assert_eq!(*engine.deleted.lock().unwrap(), ["root.sg1"]);
}

#[test]
fn deleting_a_whole_group_by_prefix_empties_it() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());

    manager.set_storage_group("root.sg1").unwrap();
    manager.set_storage_group("root.sg2").unwrap();
    for path in ["root.sg1.d1.s1", "root.sg1.d1.s2", "root.sg1.d2.s1", "root.sg2.d1.s1"] {
        manager.create_time_series(&int32_series(path)).unwrap();
    }

    let emptied = manager.delete_time_series("root.sg1").unwrap();
    assert_eq!(emptied.into_iter().collect::<Vec<_>>(), ["root.sg1"]);
    assert_eq!(manager.series_count("root.sg1"), Some(0));
    assert_eq!(manager.series_count("root.sg2"), Some(1));
    assert_eq!(manager.max_series_count(), 1);
    assert!(manager.path_exists("root.sg2.d1.s1"));
}

#[test]
fn tag_queries_follow_create_and_delete() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());
    manager.set_storage_group("root.sg1").unwrap();

    let mut request = int32_series("root.sg1.d1.s1");
    request.tags = string_map(&[("k", "v")]);
    request.attributes = string_map(&[("description", "inlet")]);
    manager.create_time_series(&request).unwrap();

    let query = ShowTimeSeriesQuery {
        tag_filter: Some(TagFilter {
            key: "k".to_string(),
            value: "v".to_string(),
            contains: false,
        }),
        ..ShowTimeSeriesQuery::prefixed("root.sg1")
    };
    let rows = manager.show_time_series(&query).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].path, "root.sg1.d1.s1");
    assert_eq!(rows[0].storage_group, "root.sg1");
    // tags and attributes come back merged
    assert_eq!(
        rows[0].tags,
        string_map(&[("k", "v"), ("description", "inlet")])
    );

    manager.delete_time_series("root.sg1.d1.s1").unwrap();
    assert!(manager.show_time_series(&query).unwrap().is_empty());

    let unknown_key = ShowTimeSeriesQuery {
        tag_filter: Some(TagFilter {
            key: "never-indexed".to_string(),
            value: "v".to_string(),
            contains: false,
        }),
        ..ShowTimeSeriesQuery::prefixed("root.sg1")
    };
    assert!(matches!(
        manager.show_time_series(&unknown_key),
        Err(MetadataError::NotATagKey { .. })
    ));
}

#[test]
fn substring_tag_query_and_prefix_filtering() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());
    manager.set_storage_group("root.sg1").unwrap();
    manager.set_storage_group("root.sg2").unwrap();

    let mut a = int32_series("root.sg1.d1.temperature");
    a.tags = string_map(&[("unit", "celsius")]);
    manager.create_time_series(&a).unwrap();

    let mut b = int32_series("root.sg2.d1.temperature");
    b.tags = string_map(&[("unit", "millicelsius")]);
    manager.create_time_series(&b).unwrap();

    let query = ShowTimeSeriesQuery {
        tag_filter: Some(TagFilter {
            key: "unit".to_string(),
            value: "celsius".to_string(),
            contains: true,
        }),
        ..ShowTimeSeriesQuery::prefixed("root")
    };
    let rows = manager.show_time_series(&query).unwrap();
    let paths: Vec<_> = rows.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["root.sg1.d1.temperature", "root.sg2.d1.temperature"]);

    // restrict to one group by prefix
    let query = ShowTimeSeriesQuery {
        tag_filter: query.tag_filter.clone(),
        ..ShowTimeSeriesQuery::prefixed("root.sg2")
    };
    let rows = manager.show_time_series(&query).unwrap();
    let paths: Vec<_> = rows.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["root.sg2.d1.temperature"]);
}

#[test]
fn tree_listing_pages_and_carries_aliases() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());
    manager.set_storage_group("root.sg1").unwrap();

    let mut request = int32_series("root.sg1.d1.s1");
    request.alias = Some("speed".to_string());
    manager.create_time_series(&request).unwrap();
    manager.create_time_series(&int32_series("root.sg1.d1.s2")).unwrap();
    manager.create_time_series(&int32_series("root.sg1.d2.s1")).unwrap();

    let rows = manager
        .show_time_series(&ShowTimeSeriesQuery::prefixed("root.sg1"))
        .unwrap();
    let paths: Vec<_> = rows.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["root.sg1.d1.s1", "root.sg1.d1.s2", "root.sg1.d2.s1"]);
    assert_eq!(rows[0].alias.as_deref(), Some("speed"));

    let page = manager
        .show_time_series(&ShowTimeSeriesQuery {
            offset: 1,
            limit: 1,
            ..ShowTimeSeriesQuery::prefixed("root.sg1")
        })
        .unwrap();
    let paths: Vec<_> = page.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["root.sg1.d1.s2"]);
}

#[test]
fn restart_replays_the_catalog_byte_for_byte() {
    let dir = test_helpers::tmp_dir().unwrap();
    {
        let manager = open_manager(dir.path());
        manager.set_storage_group("root.sg1").unwrap();
        manager.set_storage_group("root.sg2").unwrap();

        let mut request = int32_series("root.sg1.d1.s1");
        request.alias = Some("speed".to_string());
        request.props = string_map(&[("interval", "10s")]);
        request.tags = string_map(&[("unit", "kph")]);
        request.attributes = string_map(&[("description", "wheel speed")]);
        manager.create_time_series(&request).unwrap();

        manager.create_time_series(&int32_series("root.sg1.d1.s2")).unwrap();
        manager.create_time_series(&int32_series("root.sg2.d1.s1")).unwrap();
        manager.delete_time_series("root.sg1.d1.s2").unwrap();
        manager.set_ttl("root.sg1", 604_800_000).unwrap();
    }

    let manager = open_manager(dir.path());
    assert_eq!(
        manager.time_series_paths("root").unwrap(),
        ["root.sg1.d1.s1", "root.sg2.d1.s1"]
    );
    assert_eq!(manager.series_count("root.sg1"), Some(1));
    assert_eq!(manager.series_count("root.sg2"), Some(1));
    assert_eq!(manager.max_series_count(), 1);
    assert_eq!(
        manager.storage_group_node("root.sg1").unwrap().data_ttl(),
        604_800_000
    );

    // the inverted index came back through the tag file
    let rows = manager
        .show_time_series(&ShowTimeSeriesQuery {
            tag_filter: Some(TagFilter {
                key: "unit".to_string(),
                value: "kph".to_string(),
                contains: false,
            }),
            ..ShowTimeSeriesQuery::prefixed("root.sg1")
        })
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].path, "root.sg1.d1.s1");
    assert_eq!(rows[0].alias.as_deref(), Some("speed"));
    assert_eq!(
        rows[0].tags,
        string_map(&[("unit", "kph"), ("description", "wheel speed")])
    );
}

#[test]
fn a_hand_written_log_line_is_replayed() {
    let dir = test_helpers::tmp_dir().unwrap();
    std::fs::write(
        dir.path().join(META_LOG),
        "set_storage_group,root.sg\ncreate_timeseries,root.sg.d.s,1,2,3,,,-1\n",
    )
    .unwrap();

    let manager = open_manager(dir.path());
    assert_eq!(manager.time_series_paths("root").unwrap(), ["root.sg.d.s"]);
    let node = manager.node("root.sg.d.s").unwrap();
    let leaf = node.as_leaf().unwrap();
    assert_eq!(leaf.schema().data_type, TsDataType::Int32);
    assert_eq!(leaf.schema().encoding, TsEncoding::Rle);
    assert_eq!(leaf.schema().compressor, CompressionType::Lzo);
    assert_eq!(leaf.tag_offset(), None);
}

#[test]
fn a_bad_log_line_is_skipped_not_fatal() {
    let dir = test_helpers::tmp_dir().unwrap();
    std::fs::write(
        dir.path().join(META_LOG),
        "set_storage_group,root.sg\nnot_an_opcode,whatever\ncreate_timeseries,root.sg.d.s,1,0,1,,,-1\n",
    )
    .unwrap();

    let manager = open_manager(dir.path());
    assert_eq!(manager.time_series_paths("root").unwrap(), ["root.sg.d.s"]);
}

#[test]
fn create_without_group_fails_when_auto_create_is_off() {
    let dir = test_helpers::tmp_dir().unwrap();
    let mut config = MetaConfig::new(dir.path());
    config.auto_create_schema_enabled = false;
    let manager = open_with_config(config);

    assert!(matches!(
        manager.create_time_series(&int32_series("root.sg1.d1.s1")),
        Err(MetadataError::StorageGroupNotSet { .. })
    ));
    assert!(!manager.path_exists("root.sg1"));
}

#[test]
fn auto_create_materializes_the_group_at_the_configured_level() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());

    manager.create_time_series(&int32_series("root.turbine.d1.s1")).unwrap();
    assert!(manager.is_storage_group("root.turbine"));
    assert_eq!(manager.series_count("root.turbine"), Some(1));

    let deeper = test_helpers::tmp_dir().unwrap();
    let mut config = MetaConfig::new(deeper.path());
    config.default_storage_group_level = 2;
    let manager = open_with_config(config);
    manager.create_time_series(&int32_series("root.area.line.d1.s1")).unwrap();
    assert!(manager.is_storage_group("root.area.line"));
}

#[test]
fn overlapping_storage_groups_are_rejected() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());
    manager.set_storage_group("root.a").unwrap();
    assert!(matches!(
        manager.set_storage_group("root.a.b"),
        Err(MetadataError::StorageGroupAlreadySet { .. })
    ));
}

#[test]
fn a_vetoed_series_leaves_no_trace() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = MetaManager::open(
        MetaConfig::new(dir.path()),
        Arc::new(VetoingAdapter {
            veto_series: true,
            veto_groups: false,
        }),
        Arc::new(NoopStorageEngine),
    )
    .unwrap();

    manager.set_storage_group("root.sg1").unwrap();
    let log_before = std::fs::read_to_string(dir.path().join(META_LOG)).unwrap();

    assert!(matches!(
        manager.create_time_series(&int32_series("root.sg1.d1.s1")),
        Err(MetadataError::AdapterVeto(_))
    ));
    assert!(!manager.path_exists("root.sg1.d1.s1"));
    assert!(!manager.path_exists("root.sg1.d1"));
    assert_eq!(manager.series_count("root.sg1"), Some(0));
    // the rejected create was never logged
    let log_after = std::fs::read_to_string(dir.path().join(META_LOG)).unwrap();
    assert_eq!(log_before, log_after);
}

#[test]
fn a_vetoed_storage_group_is_rolled_back() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = MetaManager::open(
        MetaConfig::new(dir.path()),
        Arc::new(VetoingAdapter {
            veto_series: false,
            veto_groups: true,
        }),
        Arc::new(NoopStorageEngine),
    )
    .unwrap();

    assert!(matches!(
        manager.set_storage_group("root.sg1"),
        Err(MetadataError::AdapterVeto(_))
    ));
    assert!(!manager.path_exists("root.sg1"));
    assert!(manager.storage_group_names().is_empty());
}

#[test]
fn deleting_storage_groups_purges_series_and_counters() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());
    manager.set_storage_group("root.sg1").unwrap();
    manager.set_storage_group("root.sg2").unwrap();

    let mut tagged = int32_series("root.sg1.d1.s1");
    tagged.tags = string_map(&[("k", "v")]);
    manager.create_time_series(&tagged).unwrap();
    manager.create_time_series(&int32_series("root.sg2.d1.s1")).unwrap();

    manager.delete_storage_groups(&["root.sg1".to_string()]).unwrap();
    assert!(!manager.path_exists("root.sg1"));
    assert_eq!(manager.series_count("root.sg1"), None);
    assert_eq!(manager.series_count("root.sg2"), Some(1));
    assert_eq!(manager.storage_group_names(), ["root.sg2"]);

    // the index no longer resolves the purged series
    let rows = manager
        .show_time_series(&ShowTimeSeriesQuery {
            tag_filter: Some(TagFilter {
                key: "k".to_string(),
                value: "v".to_string(),
                contains: false,
            }),
            ..ShowTimeSeriesQuery::prefixed("root")
        })
        .unwrap();
    assert!(rows.is_empty());

    // and a restart agrees
    drop(manager);
    let manager = open_manager(dir.path());
    assert!(!manager.path_exists("root.sg1"));
    assert_eq!(manager.storage_group_names(), ["root.sg2"]);
}

#[test]
fn setting_and_deleting_a_group_restores_the_prior_tree() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());
    manager.set_storage_group("root.area.sg").unwrap();
    manager.delete_storage_groups(&["root.area.sg".to_string()]).unwrap();

    assert!(!manager.path_exists("root.area.sg"));
    assert!(!manager.path_exists("root.area"));
    assert!(manager.storage_group_names().is_empty());

    drop(manager);
    let manager = open_manager(dir.path());
    assert!(manager.storage_group_names().is_empty());
    assert_eq!(manager.max_series_count(), 0);
}

#[test]
fn device_nodes_resolve_through_the_cache_and_auto_create() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());

    let node = manager.device_node_with_auto_create("root.vehicle.d1").unwrap();
    assert_eq!(node.name(), "d1");
    assert!(manager.is_storage_group("root.vehicle"));

    // second resolution is served from the cache
    let cached = manager.device_node_with_auto_create("root.vehicle.d1").unwrap();
    assert_eq!(cached.name(), "d1");

    let strict = test_helpers::tmp_dir().unwrap();
    let mut config = MetaConfig::new(strict.path());
    config.auto_create_schema_enabled = false;
    let manager = open_with_config(config);
    assert!(matches!(
        manager.device_node_with_auto_create("root.nothing.d1"),
        Err(MetadataError::StorageGroupNotSet { .. })
    ));
    manager.set_storage_group("root.nothing").unwrap();
    assert!(matches!(
        manager.device_node_with_auto_create("root.nothing.d1"),
        Err(MetadataError::PathNotExist { .. })
    ));
}

#[test]
fn series_type_handles_the_reserved_time_column() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());
    manager.set_storage_group("root.sg1").unwrap();
    manager.create_time_series(&int32_series("root.sg1.d1.s1")).unwrap();

    assert_eq!(manager.series_type("time").unwrap(), TsDataType::Int64);
    assert_eq!(
        manager.series_type("root.sg1.d1.s1").unwrap(),
        TsDataType::Int32
    );
    assert!(matches!(
        manager.series_type("root.sg1.d1.s9"),
        Err(MetadataError::PathNotExist { .. })
    ));
}

#[test]
fn measurement_schemas_of_a_device() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());
    manager.set_storage_group("root.sg1").unwrap();
    manager.create_time_series(&int32_series("root.sg1.d1.s1")).unwrap();
    manager.create_time_series(&int32_series("root.sg1.d1.s2")).unwrap();

    let schemas = manager.measurement_schemas("root.sg1.d1", &["s1", "s2"]).unwrap();
    assert_eq!(schemas.len(), 2);
    assert!(schemas.iter().all(|s| s.data_type == TsDataType::Int32));
    assert!(matches!(
        manager.measurement_schemas("root.sg1.d1", &["s1", "s9"]),
        Err(MetadataError::PathNotExist { .. })
    ));
}

#[test]
fn storage_group_determination_through_the_manager() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = open_manager(dir.path());
    manager.set_storage_group("root.group1").unwrap();
    manager.set_storage_group("root.group2").unwrap();
    manager.set_storage_group("root.area1.group3").unwrap();

    let mapping = manager.determine_storage_group("root.*").unwrap();
    assert_eq!(mapping.len(), 3);
    assert_eq!(mapping["root.group1"], "root.group1.*");
    assert_eq!(mapping["root.area1.group3"], "root.area1.group3.*");

    let mapping = manager.determine_storage_group("root.*.s1").unwrap();
    assert_eq!(mapping.len(), 2);
    assert_eq!(mapping["root.group1"], "root.group1.s1");
    assert_eq!(mapping["root.group2"], "root.group2.s1");
}

#[test]
fn concurrent_writers_serialize_on_the_catalog_lock() {
    let dir = test_helpers::tmp_dir().unwrap();
    let manager = Arc::new(open_manager(dir.path()));

    let handles: Vec<_> = (0..4)
        .map(|device| {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                for series in 0..25 {
                    let path = format!("root.fleet.d{device}.s{series}");
                    manager.create_time_series(&int32_series(&path)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(manager.series_count("root.fleet"), Some(100));
    assert_eq!(manager.time_series_paths("root.fleet").unwrap().len(), 100);

    // replay agrees with the live tree
    drop(manager);
    let manager = open_manager(dir.path());
    assert_eq!(manager.series_count("root.fleet"), Some(100));
    assert_eq!(manager.time_series_paths("root.fleet").unwrap().len(), 100);
}
