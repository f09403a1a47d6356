use labdash::history::storage::{KeyValueStore, SledStore};
use labdash::history::{ChunkedHistoryStore, Migration, CHUNK_SIZE, LEGACY_KEY};

#[test]
fn test_sled_store_capacity_invariant() {
    let backend = SledStore::temporary().unwrap();
    let mut store = ChunkedHistoryStore::open(backend).unwrap();

    let urls: Vec<String> = (0..1500).map(|i| format!("http://vm{}.lan", i)).collect();
    store.add_bulk(urls).unwrap();
    store.add("http://pve.lan:8006").unwrap();

    let victims: Vec<_> = store
        .get_all()
        .into_iter()
        .filter(|i| i.url.ends_with("7.lan"))
        .collect();
    for item in &victims {
        assert_eq!(store.remove(item).unwrap(), 1);
    }

    let all = store.get_all();
    assert_eq!(all.len(), 1501 - victims.len());

    for (id, cap) in store.capacities().iter().enumerate() {
        let used = all.iter().filter(|i| i.chunk_id == id).count();
        assert_eq!(*cap as usize + used, CHUNK_SIZE as usize);
    }
}

#[test]
fn test_sled_store_migrates_legacy_once() {
    let mut backend = SledStore::temporary().unwrap();
    backend
        .set(
            LEGACY_KEY,
            br#"[{"url":"http://grafana.lan","t":1700000000},{"url":"http://pihole.lan","t":1700000100}]"#,
        )
        .unwrap();

    let mut store = ChunkedHistoryStore::open(backend).unwrap();
    assert_eq!(store.migration(), &Migration::Migrated { items: 2, skipped: 0 });

    let first = store.get_all();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].url, "http://pihole.lan");

    assert_eq!(store.migrate_legacy().unwrap(), Migration::NotNeeded);
    assert_eq!(store.get_all(), first);
    assert_eq!(store.backend().get(LEGACY_KEY).unwrap(), None);
}

#[test]
fn test_sled_store_clear() {
    let backend = SledStore::temporary().unwrap();
    let mut store = ChunkedHistoryStore::new(backend).with_compression_level(3);
    for i in 0..1001 {
        store.add(&format!("http://host{}.lan", i)).unwrap();
    }
    assert_eq!(store.capacities(), vec![0, 999]);

    store.clear().unwrap();
    assert!(store.get_all().is_empty());
    assert_eq!(store.stored_bytes(), 0);

    store.add("http://fresh.lan").unwrap();
    assert_eq!(store.capacities(), vec![999]);
}
