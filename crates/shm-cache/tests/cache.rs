use pretty_assertions::assert_eq;
use quickcheck_macros::quickcheck;
use shm_cache::{Cache, Config, Error};
use std::collections::BTreeMap;
use std::sync::Arc;

fn config(max_items: u64) -> Config {
    Config {
        max_items,
        avg_key_bytes: 32,
        avg_value_bytes: 128,
        ..Config::default()
    }
}

#[test]
fn test_shared_content_is_stored_once() {
    let cache = Cache::new(config(16)).unwrap();
    let plan = b"SELECT * FROM cards WHERE cmc <= :p0";

    cache.put(b"q1", plan).unwrap();
    cache.put(b"q2", plan).unwrap();

    assert_eq!(cache.get(b"q1").unwrap().as_deref(), Some(plan.as_ref()));
    assert_eq!(cache.get(b"q2").unwrap().as_deref(), Some(plan.as_ref()));

    let stats = cache.stats().unwrap();
    assert_eq!(stats.item_count, 2);
    // Two key entries share a single content blob.
    assert_eq!(stats.fp_count, 1);
}

#[test]
fn test_lru_eviction_respects_touch() {
    let cache = Cache::new(config(2)).unwrap();
    cache.put(b"a", b"A").unwrap();
    cache.put(b"b", b"B").unwrap();
    assert!(cache.touch(b"a").unwrap());
    cache.put(b"c", b"C").unwrap();

    assert_eq!(cache.get(b"b").unwrap(), None);
    assert_eq!(cache.get(b"a").unwrap().as_deref(), Some(b"A".as_ref()));
    assert_eq!(cache.get(b"c").unwrap().as_deref(), Some(b"C".as_ref()));
    assert_eq!(cache.stats().unwrap().item_count, 2);
}

#[test]
fn test_get_refreshes_recency() {
    let cache = Cache::new(config(2)).unwrap();
    cache.put(b"a", b"A").unwrap();
    cache.put(b"b", b"B").unwrap();
    // Reading `a` makes `b` the eviction candidate.
    let _ = cache.get(b"a").unwrap();
    cache.put(b"c", b"C").unwrap();

    assert_eq!(cache.get(b"b").unwrap(), None);
    assert_eq!(cache.get(b"a").unwrap().as_deref(), Some(b"A".as_ref()));
}

#[test]
fn test_compaction_reclaims_unreferenced_blobs() {
    let cache = Cache::new(config(64)).unwrap();
    for i in 0..32u32 {
        let key = format!("key-{i}");
        let value = format!("value-{i}-{}", "x".repeat(i as usize));
        cache.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
    for i in 0..32u32 {
        if i % 2 == 0 {
            assert!(cache.delete(format!("key-{i}").as_bytes()).unwrap());
        }
    }

    let before = cache.stats().unwrap();
    cache.compact().unwrap();
    let after = cache.stats().unwrap();

    assert!(after.blob_used < before.blob_used);
    assert_eq!(after.item_count, 16);
    assert_eq!(after.fp_count, 16);
    assert_eq!(after.tombstones, 0, "compaction clears tombstones");
    assert_eq!(after.segment_version, before.segment_version + 1);

    // Every surviving key still resolves to its value.
    for i in 0..32u32 {
        let key = format!("key-{i}");
        let got = cache.get(key.as_bytes()).unwrap();
        if i % 2 == 0 {
            assert_eq!(got, None);
        } else {
            let want = format!("value-{i}-{}", "x".repeat(i as usize));
            assert_eq!(got.as_deref(), Some(want.as_bytes()));
        }
    }
}

#[test]
fn test_compaction_accounts_every_referenced_byte() {
    // After compacting, blob_used is exactly the aligned sizes of the
    // referenced key and content blobs.
    let cache = Cache::new(config(16)).unwrap();
    let entries: &[(&[u8], &[u8])] = &[
        (b"k1", b"now this is a value"),
        (b"k22", b"v"),
        (b"k333", b"a third, somewhat longer value"),
    ];
    for (key, value) in entries {
        cache.put(key, value).unwrap();
    }
    cache.compact().unwrap();

    let aligned = |len: usize| ((5 + len) as u64 + 7) & !7;
    let expected: u64 = entries
        .iter()
        .map(|(k, v)| aligned(k.len()) + aligned(v.len()))
        .sum();
    assert_eq!(cache.stats().unwrap().blob_used, expected);
}

#[test]
fn test_delete_then_reinsert_after_churn() {
    let cache = Cache::new(config(32)).unwrap();
    for round in 0..4u32 {
        for i in 0..16u32 {
            let key = format!("key-{i}");
            let value = format!("round-{round}-value-{i}");
            cache.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
        for i in (0..16u32).step_by(3) {
            cache.delete(format!("key-{i}").as_bytes()).unwrap();
        }
        cache.compact().unwrap();
    }
    for i in 0..16u32 {
        let got = cache.get(format!("key-{i}").as_bytes()).unwrap();
        if i % 3 == 0 {
            assert_eq!(got, None);
        } else {
            assert_eq!(
                got.as_deref(),
                Some(format!("round-3-value-{i}").as_bytes())
            );
        }
    }
}

#[test]
fn test_oversized_value_fails_cleanly() {
    let cache = Cache::new(config(4)).unwrap();
    cache.put(b"small", b"fits").unwrap();

    let pool_size = cache.stats().unwrap().blob_pool_size;
    let huge = vec![0xAB; pool_size as usize];
    let err = cache.put(b"huge", &huge).unwrap_err();
    assert!(matches!(err, Error::PoolFull { .. }), "got {err:?}");

    // The failed insert left the cache usable.
    cache.put(b"small2", b"also fits").unwrap();
    assert_eq!(cache.get(b"small2").unwrap().as_deref(), Some(b"also fits".as_ref()));
}

#[test]
fn test_pool_pressure_triggers_reclaim() {
    // Values large enough that the pool fills long before the table.
    let cache = Cache::new(Config {
        max_items: 8,
        avg_key_bytes: 8,
        avg_value_bytes: 64,
        ..Config::default()
    })
    .unwrap();

    for i in 0..64u32 {
        let key = format!("k{i}");
        let value = vec![i as u8; 100];
        cache.put(key.as_bytes(), &value).unwrap();
    }
    let stats = cache.stats().unwrap();
    assert!(stats.item_count <= 8);
    assert!(stats.blob_used <= stats.blob_pool_size);
}

#[test]
fn test_concurrent_readers_and_writers() {
    let cache = Arc::new(Cache::new(config(4096)).unwrap());
    let mut handles = Vec::new();

    for thread in 0..8u32 {
        let cache = Arc::clone(&cache);
        handles.push(std::thread::spawn(move || {
            for i in 0..200u32 {
                let key = format!("t{thread}-k{}", i % 20);
                let value = format!("t{thread}-v{i}");
                cache.put(key.as_bytes(), value.as_bytes()).unwrap();
                let got = cache.get(key.as_bytes()).unwrap();
                // Keys are thread-private, so the read sees this
                // thread's latest write.
                assert_eq!(got.as_deref(), Some(value.as_bytes()));
                if i % 50 == 0 {
                    cache.compact().unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats().unwrap();
    assert_eq!(stats.item_count, 8 * 20);
}

#[test]
fn test_named_segment_attach() {
    let name = format!(
        "shm-cache-test-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );

    let writer = match Cache::create_named(&name, config(16)) {
        Ok(writer) => writer,
        Err(Error::Io(err)) => {
            // Hosts without POSIX shared memory can't run this one.
            eprintln!("skipping named-segment test: {err}");
            return;
        }
        Err(other) => panic!("{other}"),
    };
    writer.put(b"shared", b"across attachments").unwrap();

    let reader = Cache::open_named(&name, config(16)).unwrap();
    assert_eq!(
        reader.get(b"shared").unwrap().as_deref(),
        Some(b"across attachments".as_ref())
    );

    Cache::unlink(&name).unwrap();
}

// Randomized workloads agree with an in-memory model while capacity
// pressure is off the table.
#[quickcheck]
fn quickcheck_matches_model(ops: Vec<(u8, u8, u8)>) -> bool {
    let cache = Cache::new(config(4096)).unwrap();
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    for (op, key_byte, value_byte) in ops {
        let key = vec![b'k', key_byte % 32];
        match op % 4 {
            0 | 1 => {
                let value = vec![value_byte; 1 + (value_byte as usize % 16)];
                cache.put(&key, &value).unwrap();
                model.insert(key, value);
            }
            2 => {
                let cached = cache.delete(&key).unwrap();
                let modeled = model.remove(&key).is_some();
                if cached != modeled {
                    return false;
                }
            }
            _ => {
                if cache.get(&key).unwrap() != model.get(&key).cloned() {
                    return false;
                }
            }
        }
    }
    cache.compact().unwrap();
    model
        .iter()
        .all(|(key, value)| cache.get(key).unwrap().as_deref() == Some(value.as_slice()))
}
