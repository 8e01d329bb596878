//! End-to-end tests of the cache pipeline over the in-memory tier and bus.
//!
//! Several `CacheStack`s built from clones of one `MemoryTier` and one
//! `MemoryInvalidationBus` behave like a fleet of instances sharing Redis.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use learnhub_cache::{
    CacheConfig, CacheError, CacheInvalidationMessage, CacheKey, CacheStack, CacheTtl,
    CacheableQuery, DistributedTier, InvalidatingCommand, InvalidationBus, InvalidationListener,
    InvalidationPattern, MemoryInvalidationBus, MemoryTier, ResolutionTiming, SerializerKind,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CategoryTree {
    names: Vec<String>,
}

struct GetCategoryTree;

impl CacheableQuery for GetCategoryTree {
    type Output = CategoryTree;

    fn cache_key(&self) -> CacheKey {
        CacheKey::singleton("categories", "tree")
    }
}

struct CreateCategory;

impl InvalidatingCommand for CreateCategory {
    type Lookup = ();

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        vec![
            CacheKey::singleton("categories", "tree").exact_pattern(),
            InvalidationPattern::selector("categories", "list"),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Course {
    id: u64,
    title: String,
}

struct GetCourse {
    id: u64,
    bypass: bool,
}

impl CacheableQuery for GetCourse {
    type Output = Course;

    fn cache_key(&self) -> CacheKey {
        CacheKey::builder("courses", "id").id(self.id).build()
    }

    fn cache_ttl(&self) -> CacheTtl {
        Duration::ZERO.into()
    }

    fn bypass_cache(&self) -> bool {
        self.bypass
    }
}

struct UpdateCourse {
    id: u64,
}

impl InvalidatingCommand for UpdateCourse {
    type Lookup = ();

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        vec![CacheKey::builder("courses", "id").id(self.id).build().exact_pattern()]
    }
}

/// Origin data store for one course, counting reads.
#[derive(Clone, Default)]
struct CourseOrigin {
    title: Arc<Mutex<String>>,
    reads: Arc<AtomicUsize>,
}

impl CourseOrigin {
    fn new(title: &str) -> Self {
        let origin = Self::default();
        origin.write(title);
        origin
    }

    fn write(&self, title: &str) {
        *self.title.lock().unwrap() = title.to_string();
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn load(&self, id: u64) -> Result<Course, Infallible> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Course {
            id,
            title: self.title.lock().unwrap().clone(),
        })
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn fleet(size: usize) -> Vec<CacheStack> {
    let tier = MemoryTier::new();
    let bus = MemoryInvalidationBus::new();
    (0..size)
        .map(|_| CacheStack::in_memory(&CacheConfig::default(), tier.clone(), bus.clone()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_concurrent_misses_run_the_handler_once() {
    let stack = CacheStack::local_only(&CacheConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let pipeline = stack.pipeline().clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            pipeline
                .query(&GetCategoryTree, || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, Infallible>(CategoryTree {
                            names: vec!["Programming".to_string()],
                        })
                    }
                })
                .await
        }));
    }

    for handle in handles {
        let tree = handle.await.unwrap().unwrap();
        assert_eq!(tree.names, vec!["Programming".to_string()]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_category_tree_refreshes_after_create() {
    let stack = CacheStack::local_only(&CacheConfig::default()).unwrap();
    let pipeline = stack.pipeline();
    let categories = Arc::new(Mutex::new(vec!["Programming".to_string()]));

    let read_tree = || {
        let categories = Arc::clone(&categories);
        async move {
            Ok::<_, Infallible>(CategoryTree {
                names: categories.lock().unwrap().clone(),
            })
        }
    };

    assert_eq!(
        pipeline.policy().resolve("categories:tree"),
        Duration::from_secs(60 * 60)
    );

    let before = pipeline.query(&GetCategoryTree, read_tree).await.unwrap();
    assert_eq!(before.names.len(), 1);
    stack
        .cache()
        .set("categories:list:1:20:_:_", b"page".to_vec(), Duration::from_secs(60))
        .await;

    pipeline
        .command(&CreateCategory, &(), || async {
            categories.lock().unwrap().push("Design".to_string());
            Ok::<_, Infallible>(())
        })
        .await
        .unwrap();

    assert!(stack.cache().get("categories:list:1:20:_:_").await.is_none());
    let after = pipeline.query(&GetCategoryTree, read_tree).await.unwrap();
    assert_eq!(after.names, vec!["Programming".to_string(), "Design".to_string()]);
}

#[tokio::test]
async fn test_writer_never_reads_its_own_stale_value() {
    let stacks = fleet(1);
    let stack = &stacks[0];
    let origin = CourseOrigin::new("Rust 101");
    let query = GetCourse { id: 7, bypass: false };

    let cached = stack.pipeline().query(&query, || origin.load(7)).await.unwrap();
    assert_eq!(cached.title, "Rust 101");

    stack
        .pipeline()
        .command(&UpdateCourse { id: 7 }, &(), || async {
            origin.write("Rust 102");
            Ok::<_, Infallible>(())
        })
        .await
        .unwrap();

    let fresh = stack.pipeline().query(&query, || origin.load(7)).await.unwrap();
    assert_eq!(fresh.title, "Rust 102");
    assert_eq!(origin.reads(), 2);
}

#[tokio::test]
async fn test_peers_converge_after_broadcast() {
    let stacks = fleet(2);
    let (a, b) = (&stacks[0], &stacks[1]);
    let origin = CourseOrigin::new("Rust 101");
    let query = GetCourse { id: 7, bypass: false };
    let key = query.cache_key();

    a.pipeline().query(&query, || origin.load(7)).await.unwrap();
    // B is served from the shared tier and keeps a local copy.
    let seen_by_b = b.pipeline().query(&query, || origin.load(7)).await.unwrap();
    assert_eq!(seen_by_b.title, "Rust 101");
    assert_eq!(origin.reads(), 1);
    assert!(b.cache().local().contains(key.as_str()));

    a.pipeline()
        .command(&UpdateCourse { id: 7 }, &(), || async {
            origin.write("Rust 102");
            Ok::<_, Infallible>(())
        })
        .await
        .unwrap();

    wait_until(|| !b.cache().local().contains(key.as_str())).await;
    let fresh = b.pipeline().query(&query, || origin.load(7)).await.unwrap();
    assert_eq!(fresh.title, "Rust 102");
}

#[tokio::test]
async fn test_bypass_still_writes_through() {
    let stacks = fleet(2);
    let (a, b) = (&stacks[0], &stacks[1]);
    let origin = CourseOrigin::new("Rust 101");

    let normal = GetCourse { id: 1, bypass: false };
    let bypass = GetCourse { id: 1, bypass: true };

    a.pipeline().query(&normal, || origin.load(1)).await.unwrap();
    origin.write("Rust 101 (2nd edition)");

    // Served from origin even though the key is cached.
    let fresh = a.pipeline().query(&bypass, || origin.load(1)).await.unwrap();
    assert_eq!(fresh.title, "Rust 101 (2nd edition)");
    assert_eq!(origin.reads(), 2);

    // And stored for everyone else.
    let cached = b.pipeline().query(&normal, || origin.load(1)).await.unwrap();
    assert_eq!(cached.title, "Rust 101 (2nd edition)");
    assert_eq!(origin.reads(), 2);
}

#[tokio::test]
async fn test_failed_command_invalidates_nothing() {
    let stack = CacheStack::local_only(&CacheConfig::default()).unwrap();
    let origin = CourseOrigin::new("Rust 101");
    let query = GetCourse { id: 3, bypass: false };
    stack.pipeline().query(&query, || origin.load(3)).await.unwrap();

    let result = stack
        .pipeline()
        .command(&UpdateCourse { id: 3 }, &(), || async { Err::<(), _>("conflict") })
        .await;
    assert_eq!(result, Err("conflict"));
    assert!(stack.cache().local().contains(query.cache_key().as_str()));
}

#[tokio::test]
async fn test_handler_error_is_returned_and_not_cached() {
    let stack = CacheStack::local_only(&CacheConfig::default()).unwrap();
    let query = GetCourse { id: 9, bypass: false };

    let result = stack
        .pipeline()
        .query(&query, || async { Err::<Course, _>("database unavailable") })
        .await;
    assert_eq!(result, Err("database unavailable"));
    assert!(stack.cache().get(query.cache_key().as_str()).await.is_none());
}

#[tokio::test]
async fn test_corrupt_entry_is_replaced() {
    let config = CacheConfig {
        serializer: SerializerKind::Json,
        ..CacheConfig::default()
    };
    let stack = CacheStack::local_only(&config).unwrap();
    let origin = CourseOrigin::new("Rust 101");
    let query = GetCourse { id: 5, bypass: false };
    let key = query.cache_key();

    stack
        .cache()
        .set(key.as_str(), b"{not json".to_vec(), Duration::from_secs(60))
        .await;

    let course = stack.pipeline().query(&query, || origin.load(5)).await.unwrap();
    assert_eq!(course.title, "Rust 101");

    let stored = stack.cache().get(key.as_str()).await.unwrap();
    let decoded: Course = serde_json::from_slice(&stored).unwrap();
    assert_eq!(decoded, course);

    stack.pipeline().query(&query, || origin.load(5)).await.unwrap();
    assert_eq!(origin.reads(), 1);
}

struct UnreachableTier;

#[async_trait]
impl DistributedTier for UnreachableTier {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn get(&self, _key: &str) -> learnhub_cache::Result<Option<Vec<u8>>> {
        Err(CacheError::distributed("connection refused"))
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> learnhub_cache::Result<()> {
        Err(CacheError::distributed("connection refused"))
    }

    async fn remove(&self, _key: &str) -> learnhub_cache::Result<()> {
        Err(CacheError::distributed("connection refused"))
    }

    async fn remove_by_prefix(&self, _prefix: &str) -> learnhub_cache::Result<u64> {
        // Hangs until the operation timeout gives up on it.
        std::future::pending::<()>().await;
        Ok(0)
    }

    async fn ping(&self) -> bool {
        false
    }
}

struct UnreachableBus;

#[async_trait]
impl InvalidationBus for UnreachableBus {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn publish(&self, _message: &CacheInvalidationMessage) -> learnhub_cache::Result<()> {
        Err(CacheError::broadcast("connection refused"))
    }

    fn subscribe(&self, _listener: InvalidationListener) -> JoinHandle<()> {
        tokio::spawn(async {})
    }
}

#[tokio::test]
async fn test_unreachable_distributed_tier_degrades_to_local() {
    let config = CacheConfig {
        operation_timeout_ms: 50,
        ..CacheConfig::default()
    };
    let stack = CacheStack::with_parts(
        &config,
        Some(Arc::new(UnreachableTier)),
        Some(Arc::new(UnreachableBus)),
    )
    .unwrap();
    let origin = CourseOrigin::new("Rust 101");
    let query = GetCourse { id: 2, bypass: false };

    stack.pipeline().query(&query, || origin.load(2)).await.unwrap();
    stack.pipeline().query(&query, || origin.load(2)).await.unwrap();
    assert_eq!(origin.reads(), 1, "second read served from the local tier");

    let updated = stack
        .pipeline()
        .command(&UpdateCourse { id: 2 }, &(), || async {
            origin.write("Rust 102");
            Ok::<_, Infallible>("updated")
        })
        .await
        .unwrap();
    assert_eq!(updated, "updated");

    stack
        .pipeline()
        .invalidate(&[InvalidationPattern::entity("courses")], None)
        .await;

    let fresh = stack.pipeline().query(&query, || origin.load(2)).await.unwrap();
    assert_eq!(fresh.title, "Rust 102");
    assert!(!stack.cache().is_distributed_available().await);
}

/// Shared tier whose reads answer 100ms after they sampled the data.
struct LaggingTier(MemoryTier);

#[async_trait]
impl DistributedTier for LaggingTier {
    fn name(&self) -> &'static str {
        "lagging"
    }

    async fn get(&self, key: &str) -> learnhub_cache::Result<Option<Vec<u8>>> {
        let value = self.0.get(key).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        value
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> learnhub_cache::Result<()> {
        self.0.set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> learnhub_cache::Result<()> {
        self.0.remove(key).await
    }

    async fn remove_by_prefix(&self, prefix: &str) -> learnhub_cache::Result<u64> {
        self.0.remove_by_prefix(prefix).await
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_slow_shared_read_does_not_outlive_a_write() {
    let config = CacheConfig {
        operation_timeout_ms: 1_000,
        ..CacheConfig::default()
    };
    let stack = CacheStack::with_parts(
        &config,
        Some(Arc::new(LaggingTier(MemoryTier::new()))),
        None,
    )
    .unwrap();
    let origin = CourseOrigin::new("v1");
    let query = GetCourse { id: 4, bypass: false };

    stack.pipeline().query(&query, || origin.load(4)).await.unwrap();
    stack.cache().clear_local();

    let pipeline = stack.pipeline().clone();
    let reader_origin = origin.clone();
    let reader = tokio::spawn(async move {
        pipeline
            .query(&GetCourse { id: 4, bypass: false }, || reader_origin.load(4))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    stack
        .pipeline()
        .command(&UpdateCourse { id: 4 }, &(), || async {
            origin.write("v2");
            Ok::<_, Infallible>(())
        })
        .await
        .unwrap();

    assert_eq!(reader.await.unwrap().unwrap().title, "v1");
    let after = stack.pipeline().query(&query, || origin.load(4)).await.unwrap();
    assert_eq!(after.title, "v2");
}

/// Enrollment rows: id -> (user id, course id).
type EnrollmentIndex = Mutex<std::collections::HashMap<u64, (u64, u64)>>;

struct CancelEnrollment {
    id: u64,
}

#[async_trait]
impl InvalidatingCommand for CancelEnrollment {
    type Lookup = EnrollmentIndex;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        vec![InvalidationPattern::entity("enrollments")]
    }

    fn resolution_timing(&self) -> ResolutionTiming {
        ResolutionTiming::BeforeWrite
    }

    async fn resolve_patterns(&self, lookup: &EnrollmentIndex) -> anyhow::Result<Vec<InvalidationPattern>> {
        let (user, course) = lookup
            .lock()
            .unwrap()
            .get(&self.id)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("enrollment {} not found", self.id))?;
        Ok(vec![
            CacheKey::builder("enrollments", "user").id(user).wildcard(),
            CacheKey::builder("enrollments", "course").id(course).wildcard(),
            CacheKey::builder("courses", "id").id(course).build().exact_pattern(),
        ])
    }
}

#[tokio::test]
async fn test_resolution_before_delete_uses_pre_write_state() {
    let stack = CacheStack::local_only(&CacheConfig::default()).unwrap();
    let index: EnrollmentIndex = Mutex::new([(10, (1, 2)), (11, (3, 4))].into_iter().collect());

    for key in [
        "enrollments:user:1:1:20:_:_",
        "enrollments:course:2:1:20:_:_",
        "courses:id:2",
        "enrollments:user:3:1:20:_:_",
    ] {
        stack.cache().set(key, b"v".to_vec(), Duration::from_secs(60)).await;
    }

    stack
        .pipeline()
        .command(&CancelEnrollment { id: 10 }, &index, || async {
            index.lock().unwrap().remove(&10);
            Ok::<_, Infallible>(())
        })
        .await
        .unwrap();

    let local = stack.cache().local();
    assert!(!local.contains("enrollments:user:1:1:20:_:_"));
    assert!(!local.contains("enrollments:course:2:1:20:_:_"));
    assert!(!local.contains("courses:id:2"));
    assert!(local.contains("enrollments:user:3:1:20:_:_"));
}

#[tokio::test]
async fn test_resolution_failure_falls_back_to_declared_patterns() {
    let stack = CacheStack::local_only(&CacheConfig::default()).unwrap();
    let index: EnrollmentIndex = Mutex::default();
    stack
        .cache()
        .set("enrollments:user:3:1:20:_:_", b"v".to_vec(), Duration::from_secs(60))
        .await;
    stack
        .cache()
        .set("courses:id:4", b"v".to_vec(), Duration::from_secs(60))
        .await;

    stack
        .pipeline()
        .command(&CancelEnrollment { id: 99 }, &index, || async { Ok::<_, Infallible>(()) })
        .await
        .unwrap();

    assert!(!stack.cache().local().contains("enrollments:user:3:1:20:_:_"));
    assert!(stack.cache().local().contains("courses:id:4"));
}

#[tokio::test]
async fn test_messages_carry_correlation_id() {
    let tier = MemoryTier::new();
    let bus = MemoryInvalidationBus::new();
    let stack = CacheStack::in_memory(&CacheConfig::default(), tier, bus.clone()).unwrap();
    let mut observer = bus.receiver();

    stack
        .pipeline()
        .command(&CreateCategory, &(), || async { Ok::<_, Infallible>(()) })
        .await
        .unwrap();

    let first = observer.recv().await.unwrap();
    let second = observer.recv().await.unwrap();
    assert_eq!(first.source_instance_id, stack.instance_id());
    assert_eq!(first.key_pattern, "categories:tree");
    assert_eq!(second.key_pattern, "categories:list:*");
    assert!(first.correlation_id.is_some());
    assert_eq!(first.correlation_id, second.correlation_id);
}
