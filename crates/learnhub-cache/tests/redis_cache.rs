//! Integration tests against a real Redis.
//!
//! - L2 operations and SCAN-based prefix removal
//! - Pub/Sub invalidation between two stacks sharing the server
//!
//! Tests use testcontainers to spin up Redis, so they need Docker:
//! `cargo test -p learnhub-cache --test redis_cache -- --ignored`

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use learnhub_cache::{
    CacheConfig, CacheKey, CacheStack, CacheableQuery, DistributedTier, InvalidatingCommand,
    InvalidationPattern, RedisConfig, RedisTier,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

fn redis_config(url: String) -> RedisConfig {
    RedisConfig {
        enabled: true,
        url,
        ..RedisConfig::default()
    }
}

/// Each test gets its own namespace so they can share the container.
fn cache_config(namespace: &str) -> CacheConfig {
    CacheConfig {
        key_namespace: format!("test-{namespace}:"),
        channel: format!("cache:invalidate:{namespace}"),
        operation_timeout_ms: 2000,
        scan_batch_size: 2,
        ..CacheConfig::default()
    }
}

fn tier(url: &str, namespace: &str) -> RedisTier {
    let pool = deadpool_redis::Config::from_url(url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("create pool");
    RedisTier::new(pool, format!("test-{namespace}:"), 2)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_tier_get_set_remove() {
    let url = get_redis_url().await;
    let tier = tier(&url, "tier");

    tier.set("courses:id:1", b"v1", Duration::from_secs(60)).await.unwrap();
    assert_eq!(tier.get("courses:id:1").await.unwrap(), Some(b"v1".to_vec()));

    tier.remove("courses:id:1").await.unwrap();
    assert_eq!(tier.get("courses:id:1").await.unwrap(), None);
    assert!(tier.ping().await);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_tier_ttl_expires() {
    let url = get_redis_url().await;
    let tier = tier(&url, "ttl");

    tier.set("orders:id:1", b"v", Duration::from_millis(100)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tier.get("orders:id:1").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_prefix_removal_spans_scan_pages() {
    let url = get_redis_url().await;
    let tier = tier(&url, "scan");

    for page in 1..=7 {
        let key = format!("courses:list:{page}:20:_:_");
        tier.set(&key, b"page", Duration::from_secs(60)).await.unwrap();
    }
    tier.set("courses:id:1", b"course", Duration::from_secs(60)).await.unwrap();

    let removed = tier.remove_by_prefix("courses:list:").await.unwrap();
    assert_eq!(removed, 7);
    assert!(tier.get("courses:id:1").await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_prefix_is_matched_literally() {
    let url = get_redis_url().await;
    let tier = tier(&url, "glob");

    tier.set("search:a*:1", b"v", Duration::from_secs(60)).await.unwrap();
    tier.set("search:ab:1", b"v", Duration::from_secs(60)).await.unwrap();

    let removed = tier.remove_by_prefix("search:a*:").await.unwrap();
    assert_eq!(removed, 1);
    assert!(tier.get("search:ab:1").await.unwrap().is_some());
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Lessons {
    titles: Vec<String>,
}

struct GetCourseLessons {
    course_id: u64,
}

impl CacheableQuery for GetCourseLessons {
    type Output = Lessons;

    fn cache_key(&self) -> CacheKey {
        CacheKey::builder("lessons", "course").id(self.course_id).build()
    }
}

struct UpdateLesson {
    course_id: u64,
}

impl InvalidatingCommand for UpdateLesson {
    type Lookup = ();

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        vec![CacheKey::builder("lessons", "course").id(self.course_id).build().exact_pattern()]
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_invalidation_reaches_peer_through_pubsub() {
    let url = get_redis_url().await;
    let config = cache_config("pubsub");
    let a = CacheStack::connect(&config, &redis_config(url.clone())).await.unwrap();
    let b = CacheStack::connect(&config, &redis_config(url)).await.unwrap();
    assert_eq!(a.stats().mode, "redis");

    // Give both listeners time to subscribe.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reads = Arc::new(AtomicUsize::new(0));
    let load = || {
        let reads = Arc::clone(&reads);
        async move {
            reads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(Lessons {
                titles: vec!["Ownership".to_string()],
            })
        }
    };

    let query = GetCourseLessons { course_id: 4 };
    a.pipeline().query(&query, load).await.unwrap();
    b.pipeline().query(&query, load).await.unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    let key = query.cache_key();
    assert!(b.cache().local().contains(key.as_str()));

    a.pipeline()
        .command(&UpdateLesson { course_id: 4 }, &(), || async { Ok::<_, Infallible>(()) })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while b.cache().local().contains(key.as_str()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer invalidated");

    b.pipeline().query(&query, load).await.unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}
