//! Load testing for the chaos proxy.

use std::time::{Duration, Instant};

use chaos_proxy::store::{KeyRecord, MemoryStore};

mod common;

#[tokio::test]
async fn test_load_with_half_failures() {
    // 1. Setup Mock Backend
    let (backend_addr, seen) = common::start_mock_backend(r#"{"pong":true}"#).await;

    // 2. Setup key with a 50% fail rate and a small latency window
    let store = MemoryStore::with_keys([(
        "load".to_string(),
        KeyRecord {
            fail_rate: 50,
            min_latency: 1,
            max_latency: 5,
            error_codes: vec![503],
            ..common::key_record(42, &format!("http://{}", backend_addr))
        },
    )]);

    // 3. Start Proxy
    let (proxy_addr, _shutdown) = common::start_proxy_with_store(&store).await;

    // 4. Run Load Test
    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::new();
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..concurrency {
        let client = client.clone();
        let url = format!("http://{}/load/ping", proxy_addr);
        handles.push(tokio::spawn(async move {
            let mut ok = 0u32;
            let mut injected = 0u32;
            for _ in 0..requests_per_task {
                let res = client.get(&url).send().await.unwrap();
                match res.status().as_u16() {
                    200 => ok += 1,
                    503 => injected += 1,
                    other => panic!("unexpected status {}", other),
                }
            }
            (ok, injected)
        }));
    }

    let mut ok = 0;
    let mut injected = 0;
    for handle in handles {
        let (o, i) = handle.await.unwrap();
        ok += o;
        injected += i;
    }

    let duration = start.elapsed();
    println!(
        "{} requests in {:?} ({} forwarded, {} injected)",
        total_requests, duration, ok, injected
    );

    // 5. Every accepted request is counted once, whatever its outcome
    assert_eq!((ok + injected) as usize, total_requests);
    assert_eq!(common::usage_of(&store, 42), total_requests as u64);
    assert_eq!(seen.lock().unwrap().len(), ok as usize);

    // 500 trials at p=0.5: far outside 150..350 is a broken injector
    assert!((150..=350).contains(&injected), "injected = {}", injected);
    assert!(duration < Duration::from_secs(30));
}
