//! Integration tests driving a shard through the command surface

use rand::Rng;
use tempfile::TempDir;
use vecsim::vector::encode_floats;
use vecsim::{execute, Reply, Shard, SnapshotManager, StoreConfig};

const DIM: usize = 128;

fn random_payload(rng: &mut impl Rng) -> Vec<u8> {
    encode_floats(&random_vector(rng))
}

fn run(shard: &mut Shard, argv: &[&[u8]]) -> Reply {
    execute(shard, argv)
}

fn random_vector(rng: &mut impl Rng) -> Vec<f32> {
    (0..DIM).map(|_| rng.gen::<f32>()).collect()
}

/// Insert `count` random vectors as `key0..`, returning what was inserted.
fn seed(shard: &mut Shard, count: usize) -> Vec<(String, Vec<f32>)> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let key = format!("key{}", i);
            let values = random_vector(&mut rng);
            let reply = run(shard, &[b"RG.VEC_ADD", key.as_bytes(), &encode_floats(&values)]);
            assert_eq!(reply, Reply::Ok);
            (key, values)
        })
        .collect()
}

/// Decode a RG.VEC_SIM reply into `(key, score)` pairs.
fn sim(shard: &mut Shard, k: &str, query: &[u8]) -> Vec<(String, f64)> {
    match run(shard, &[b"RG.VEC_SIM", k.as_bytes(), query]) {
        Reply::Array(parts) => match &parts[0] {
            Reply::Array(results) => results
                .iter()
                .map(|pair| match pair.clone() {
                    Reply::Array(kv) => match kv.as_slice() {
                        [Reply::Bulk(key), Reply::Double(score)] => {
                            (String::from_utf8(key.clone()).unwrap(), *score)
                        }
                        other => panic!("unexpected pair reply {:?}", other),
                    },
                    other => panic!("unexpected pair reply {:?}", other),
                })
                .collect(),
            other => panic!("unexpected results reply {:?}", other),
        },
        other => panic!("unexpected reply {:?}", other),
    }
}

fn sim_keys(shard: &mut Shard, k: &str, query: &[u8]) -> Vec<String> {
    sim(shard, k, query).into_iter().map(|(key, _)| key).collect()
}

/// Brute-force cosine ranking: score descending, then key ascending.
fn reference_top_k(records: &[(String, Vec<f32>)], query: &[f32], k: usize) -> Vec<(String, f64)> {
    let norm = |v: &[f32]| v.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt();
    let query_norm = norm(query);
    let mut scored: Vec<(String, f64)> = records
        .iter()
        .map(|(key, v)| {
            let dot: f64 = query.iter().zip(v).map(|(&a, &b)| a as f64 * b as f64).sum();
            (key.clone(), dot / (query_norm * norm(v)))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

fn dbsize(shard: &mut Shard) -> i64 {
    match run(shard, &[b"DBSIZE"]) {
        Reply::Integer(n) => n,
        other => panic!("unexpected reply {:?}", other),
    }
}

fn shard() -> Shard {
    Shard::new(StoreConfig::with_dimension(DIM)).unwrap()
}

#[test]
fn test_basic_workflow() {
    let mut shard = shard();
    let records = seed(&mut shard, 1000);
    assert_eq!(dbsize(&mut shard), 1000);

    let query = random_vector(&mut rand::thread_rng());
    let results = sim(&mut shard, "5", &encode_floats(&query));
    let expected = reference_top_k(&records, &query, 5);

    assert_eq!(results.len(), 5);
    for ((key, score), (expected_key, expected_score)) in results.iter().zip(&expected) {
        assert_eq!(key, expected_key);
        assert!((score - expected_score).abs() <= 1e-5);
    }
    for pair in results.windows(2) {
        assert!(pair[0].1 >= pair[1].1, "scores out of order: {:?}", pair);
    }
}

#[test]
fn test_delete_half() {
    let mut shard = shard();
    seed(&mut shard, 1000);

    for i in 0..500 {
        let key = format!("key{}", i);
        assert_eq!(
            run(&mut shard, &[b"DEL", key.as_bytes()]),
            Reply::Integer(1)
        );
    }
    assert_eq!(shard.local_count(), 500);

    let query = random_payload(&mut rand::thread_rng());
    let keys = sim_keys(&mut shard, "1000", &query);
    assert_eq!(keys.len(), 500);
    for key in keys {
        let n: usize = key.trim_start_matches("key").parse().unwrap();
        assert!(n >= 500, "deleted key {} returned", key);
    }
}

#[test]
fn test_flush() {
    let mut shard = shard();
    seed(&mut shard, 200);
    assert_eq!(run(&mut shard, &[b"FLUSHALL"]), Reply::Ok);
    assert_eq!(dbsize(&mut shard), 0);

    let query = random_payload(&mut rand::thread_rng());
    assert!(sim_keys(&mut shard, "5", &query).is_empty());

    seed(&mut shard, 10);
    assert_eq!(shard.local_count(), 10);
}

#[test]
fn test_snapshot_reload() {
    let dir = TempDir::new().unwrap();
    let manager = SnapshotManager::new(dir.path()).unwrap();
    let config = StoreConfig::with_dimension(DIM);

    let mut shard = Shard::new(config.clone()).unwrap();
    seed(&mut shard, 300);
    let query = random_payload(&mut rand::thread_rng());
    let before = shard.sim(10, None, &query).unwrap();
    shard.save(&manager).unwrap();

    let mut restored = Shard::load(config, &manager).unwrap();
    assert_eq!(restored.local_count(), 300);
    let after = restored.sim(10, None, &query).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_dump_restore_roundtrip() {
    let mut shard = shard();
    let payload = random_payload(&mut rand::thread_rng());
    run(&mut shard, &[b"RG.VEC_ADD", b"src", &payload]);

    let dumped = match run(&mut shard, &[b"DUMP", b"src"]) {
        Reply::Bulk(bytes) => bytes,
        other => panic!("unexpected reply {:?}", other),
    };
    assert_eq!(
        run(&mut shard, &[b"RESTORE", b"dst", b"0", &dumped]),
        Reply::Ok
    );

    let keys = sim_keys(&mut shard, "2", &payload);
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&"src".to_string()));
    assert!(keys.contains(&"dst".to_string()));
    assert_eq!(shard.get("dst").unwrap().to_bytes(), payload);
}

#[test]
fn test_wrong_vector_size() {
    let mut shard = shard();
    let short = encode_floats(&[1.0; DIM - 1]);
    match run(&mut shard, &[b"RG.VEC_ADD", b"key", &short]) {
        Reply::Error(msg) => assert!(msg.contains("not a float vector of size 128"), "{}", msg),
        other => panic!("expected error, got {:?}", other),
    }
    match run(&mut shard, &[b"RG.VEC_SIM", b"5", &short]) {
        Reply::Error(msg) => assert!(msg.contains("not a float vector of size")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(dbsize(&mut shard), 0);
}

#[test]
fn test_foreign_overwrite() {
    let mut shard = shard();
    seed(&mut shard, 3);
    assert_eq!(
        run(&mut shard, &[b"SET", b"key0", b"plain"]),
        Reply::Ok
    );
    assert_eq!(shard.local_count(), 2);
    assert_eq!(dbsize(&mut shard), 3);

    let query = random_payload(&mut rand::thread_rng());
    let keys = sim_keys(&mut shard, "10", &query);
    assert!(!keys.contains(&"key0".to_string()));
}
