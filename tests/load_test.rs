//! Concurrent sessions under load stay isolated.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod common;

use common::{start_target, ProxyHarness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_are_isolated() {
    let target = start_target().await;
    let proxy = Arc::new(ProxyHarness::start().await);

    let sessions = 20;
    let calls_per_session = 5;
    let start = Instant::now();

    let mut handles = Vec::new();
    for n in 0..sessions {
        let proxy = proxy.clone();
        handles.push(tokio::spawn(async move {
            let session = proxy.subscribe().await;
            let tag = format!("client-{n}");
            proxy
                .post_json("/set-headers", &session, Some(json!({"X-Client": tag})))
                .await;

            for _ in 0..calls_per_session {
                let (status, body) = proxy
                    .forward(&session, json!({"url": format!("http://{target}/echo")}))
                    .await;
                assert_eq!(status, 200);
                let echoed: Value = serde_json::from_str(body["body"].as_str().unwrap()).unwrap();
                assert_eq!(echoed["headers"]["x-client"], tag.as_str());
            }
            session
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }

    let elapsed = start.elapsed();
    println!(
        "{} forwards across {sessions} sessions in {elapsed:?}",
        sessions * calls_per_session
    );
    assert!(elapsed < Duration::from_secs(30));

    assert_eq!(proxy.store.len(), sessions);
    for id in &ids {
        // subscribe is not counted; set-headers plus each forward are
        let record = proxy.store.get(id).unwrap();
        assert_eq!(record.request_count(), 1 + calls_per_session as u64);
    }
}
