//! Metric emission checks: hit/miss counters on the read path and job
//! counters/latency on the propagation path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;
use serial_test::serial;

use strato::{
    AdapterRegistry, CacheConfig, CacheError, EntityLoader, EntitySpec, InstanceCache,
    MemoryStore, ModelAdapter, Payload, Pk, PropagationWorker,
};

#[derive(Debug, Clone)]
struct Widget {
    id: i64,
}

struct WidgetLoader;

#[async_trait]
impl EntityLoader<Widget> for WidgetLoader {
    async fn load(&self, pk: &Pk) -> Result<Option<Widget>, CacheError> {
        let Pk::Int(id) = pk else { return Ok(None) };
        Ok(Some(Widget { id: *id }))
    }
}

fn build_cache() -> Arc<InstanceCache<Widget>> {
    let mut adapters = AdapterRegistry::new();
    adapters.register(
        "Widget",
        "default",
        ModelAdapter::new()
            .with_loader(WidgetLoader)
            .with_serializer(|widget: &Widget, _| {
                let mut payload = Payload::new();
                payload.insert("id".to_string(), json!(widget.id));
                Ok(Some(payload))
            }),
    );
    Arc::new(
        InstanceCache::new(
            Arc::new(MemoryStore::default()),
            adapters,
            CacheConfig::default(),
        )
        .unwrap(),
    )
}

#[tokio::test]
#[serial]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let cache = build_cache();

    // One miss, one hit.
    cache
        .get_instances(vec![EntitySpec::new("Widget", 1)], None)
        .await
        .unwrap();
    cache
        .get_instances(vec![EntitySpec::new("Widget", 1)], None)
        .await
        .unwrap();

    // One propagation job.
    let (queue, mut worker) = PropagationWorker::new(cache.clone());
    queue.submit("Widget", 1);
    worker.run_until_idle().await;

    let snapshot = snapshotter.snapshot().into_vec();
    let mut counters: HashMap<String, u64> = HashMap::new();
    let mut names: HashSet<String> = HashSet::new();
    for (key, _, _, value) in snapshot {
        let name = key.key().name().to_string();
        if let DebugValue::Counter(count) = value {
            counters.insert(name.clone(), count);
        }
        names.insert(name);
    }

    assert_eq!(counters.get("strato_instance_misses_total"), Some(&1));
    assert_eq!(counters.get("strato_instance_hits_total"), Some(&1));
    assert_eq!(counters.get("strato_propagation_jobs_total"), Some(&1));
    assert!(names.contains("strato_propagation_ms"));
}
