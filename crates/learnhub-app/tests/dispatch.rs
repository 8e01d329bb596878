//! Request dispatch through the cache pipeline against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use learnhub_app::features::categories::{CreateCategory, GetCategories, GetCategoryTree};
use learnhub_app::features::courses::{
    self, CreateCourse, GetCategoryCourses, GetCourseById, GetCourseBySlug, GetCourses,
    PublishCourse, UpdateCourse,
};
use learnhub_app::features::enrollments::{
    self, CancelEnrollment, Enroll, GetCourseEnrollments, GetEnrollmentById, GetUserEnrollments,
    UpdateEnrollmentProgress,
};
use learnhub_app::features::lessons::{
    self, CreateLesson, DeleteLesson, GetCourseLessons, GetFreeLessons, MarkLessonFree,
};
use learnhub_app::models::{Course, Enrollment, PageRequest};
use learnhub_app::{AppError, Dispatcher, MemoryStore, Repositories};
use learnhub_cache::{CacheConfig, CacheStack, CacheableQuery, MemoryInvalidationBus, MemoryTier};

/// One application instance.
struct Node {
    stack: CacheStack,
    dispatcher: Dispatcher,
}

impl Node {
    fn new(store: &Arc<MemoryStore>, tier: &MemoryTier, bus: &MemoryInvalidationBus) -> Self {
        let stack = CacheStack::in_memory(&CacheConfig::default(), tier.clone(), bus.clone()).unwrap();
        let dispatcher = Dispatcher::new(stack.pipeline().clone(), Repositories::from_store(store.clone()));
        Self { stack, dispatcher }
    }

    fn is_cached<Q: CacheableQuery>(&self, query: &Q) -> bool {
        self.stack.cache().local().contains(query.cache_key().as_str())
    }
}

fn single() -> (Arc<MemoryStore>, Node) {
    let store = Arc::new(MemoryStore::new());
    let node = Node::new(&store, &MemoryTier::new(), &MemoryInvalidationBus::new());
    (store, node)
}

/// A published course with one free and one paid lesson.
async fn published_course(dispatcher: &Dispatcher, slug: &str) -> Course {
    let category = dispatcher
        .command(&CreateCategory {
            name: "Programming".to_string(),
            parent_id: None,
        })
        .await
        .unwrap();
    let course = dispatcher
        .command(&CreateCourse {
            category_id: category.id,
            title: "Intro to Rust".to_string(),
            slug: slug.to_string(),
            ..CreateCourse::default()
        })
        .await
        .unwrap();
    for (position, is_free) in [(1, true), (2, false)] {
        dispatcher
            .command(&CreateLesson {
                course_id: course.id,
                title: format!("Lesson {position}"),
                position,
                is_free,
                ..CreateLesson::default()
            })
            .await
            .unwrap();
    }
    dispatcher
        .command(&PublishCourse {
            id: course.id,
            published: true,
        })
        .await
        .unwrap()
}

async fn enroll(dispatcher: &Dispatcher, user_id: u64, course_id: u64) -> Enrollment {
    dispatcher
        .command(&Enroll { user_id, course_id })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_category_tree_is_reread_after_create() {
    let (store, node) = single();
    let d = &node.dispatcher;

    assert_eq!(
        d.pipeline().policy().resolve(GetCategoryTree.cache_key().as_str()),
        Duration::from_secs(60 * 60)
    );

    d.command(&CreateCategory {
        name: "Programming".to_string(),
        parent_id: None,
    })
    .await
    .unwrap();

    let tree = d.query(&GetCategoryTree).await.unwrap();
    assert_eq!(tree.len(), 1);
    d.query(&GetCategories::default()).await.unwrap();
    let reads = store.reads();

    // Served from cache.
    assert_eq!(d.query(&GetCategoryTree).await.unwrap(), tree);
    assert_eq!(store.reads(), reads);

    d.command(&CreateCategory {
        name: "Design".to_string(),
        parent_id: None,
    })
    .await
    .unwrap();

    assert!(!node.is_cached(&GetCategoryTree));
    assert!(!node.is_cached(&GetCategories::default()));
    let tree = d.query(&GetCategoryTree).await.unwrap();
    assert_eq!(tree.len(), 2);
    assert!(store.reads() > reads);
}

#[tokio::test]
async fn test_progress_update_resolves_user_and_course_scopes() {
    let (_store, node) = single();
    let d = &node.dispatcher;
    let course = published_course(d, "intro-to-rust").await;
    let other = published_course(d, "advanced-rust").await;
    let enrollment = enroll(d, 3, course.id).await;

    let by_user = GetUserEnrollments {
        user_id: 3,
        page: PageRequest::default(),
    };
    let by_course = GetCourseEnrollments {
        course_id: course.id,
        page: PageRequest::default(),
    };
    let by_id = GetEnrollmentById { id: enrollment.id };
    let course_query = GetCourseById { id: course.id };
    let unrelated = GetCourseById { id: other.id };

    d.query(&by_user).await.unwrap();
    d.query(&by_course).await.unwrap();
    d.query(&by_id).await.unwrap();
    d.query(&course_query).await.unwrap();
    d.query(&unrelated).await.unwrap();

    d.command(&UpdateEnrollmentProgress {
        enrollment_id: enrollment.id,
        progress_percent: 40,
    })
    .await
    .unwrap();

    assert!(!node.is_cached(&by_user));
    assert!(!node.is_cached(&by_course));
    assert!(!node.is_cached(&by_id));
    assert!(!node.is_cached(&course_query));
    assert!(node.is_cached(&unrelated));

    let page = d.query(&by_user).await.unwrap();
    assert_eq!(page.items[0].progress_percent, 40);
}

#[tokio::test]
async fn test_cancel_resolves_before_the_enrollment_disappears() {
    let (_store, node) = single();
    let d = &node.dispatcher;
    let course = published_course(d, "intro-to-rust").await;
    let enrollment = enroll(d, 3, course.id).await;
    let mine = enroll(d, 4, course.id).await;

    let by_user = GetUserEnrollments {
        user_id: 3,
        page: PageRequest::default(),
    };
    let other_user = GetUserEnrollments {
        user_id: 4,
        page: PageRequest::default(),
    };
    assert_eq!(d.query(&by_user).await.unwrap().total, 1);
    assert_eq!(d.query(&other_user).await.unwrap().total, 1);
    assert_eq!(
        d.query(&GetCourseById { id: course.id }).await.unwrap().unwrap().enrollment_count,
        2
    );

    d.command(&CancelEnrollment {
        enrollment_id: enrollment.id,
    })
    .await
    .unwrap();

    // Declared fallback would have purged every enrollment key.
    assert!(node.is_cached(&other_user));
    assert_eq!(d.query(&by_user).await.unwrap().total, 0);
    assert_eq!(
        d.query(&GetCourseById { id: course.id }).await.unwrap().unwrap().enrollment_count,
        1
    );
    assert_eq!(d.query(&GetEnrollmentById { id: mine.id }).await.unwrap(), Some(mine));
}

/// (enrollment_count, lesson_count) as seen by each cached view of `course`:
/// by id, by slug, the course list and the category list.
async fn course_counts(d: &Dispatcher, course: &Course) -> Vec<(u32, u32)> {
    let by_id = d.query(&GetCourseById { id: course.id }).await.unwrap();
    let by_slug = d
        .query(&GetCourseBySlug {
            slug: course.slug.clone(),
        })
        .await
        .unwrap();
    let listed = d.query(&GetCourses::default()).await.unwrap();
    let in_category = d
        .query(&GetCategoryCourses {
            category_id: course.category_id,
            page: PageRequest::default(),
        })
        .await
        .unwrap();

    by_id
        .into_iter()
        .chain(by_slug)
        .chain(listed.items.into_iter().filter(|c| c.id == course.id))
        .chain(in_category.items.into_iter().filter(|c| c.id == course.id))
        .map(|c| (c.enrollment_count, c.lesson_count))
        .collect()
}

#[tokio::test]
async fn test_every_course_view_follows_enrollment_changes() {
    let (_store, node) = single();
    let d = &node.dispatcher;
    let course = published_course(d, "intro-to-rust").await;
    assert_eq!(course_counts(d, &course).await, vec![(0, 2); 4]);

    let enrollment = enroll(d, 3, course.id).await;
    assert_eq!(course_counts(d, &course).await, vec![(1, 2); 4]);

    d.command(&CancelEnrollment {
        enrollment_id: enrollment.id,
    })
    .await
    .unwrap();
    assert_eq!(course_counts(d, &course).await, vec![(0, 2); 4]);
}

#[tokio::test]
async fn test_every_course_view_follows_lesson_changes() {
    let (_store, node) = single();
    let d = &node.dispatcher;
    let course = published_course(d, "intro-to-rust").await;
    assert_eq!(course_counts(d, &course).await, vec![(0, 2); 4]);

    let lesson = d
        .command(&CreateLesson {
            course_id: course.id,
            title: "Lesson 3".to_string(),
            position: 3,
            ..CreateLesson::default()
        })
        .await
        .unwrap();
    assert_eq!(course_counts(d, &course).await, vec![(0, 3); 4]);

    d.command(&DeleteLesson { id: lesson.id }).await.unwrap();
    assert_eq!(course_counts(d, &course).await, vec![(0, 2); 4]);
}

#[tokio::test]
async fn test_lesson_writes_refresh_course_lists() {
    let (_store, node) = single();
    let d = &node.dispatcher;
    let course = published_course(d, "intro-to-rust").await;

    let lessons = d.query(&GetCourseLessons { course_id: course.id }).await.unwrap();
    assert_eq!(lessons.len(), 2);
    let free = d.query(&GetFreeLessons { course_id: course.id }).await.unwrap();
    assert_eq!(free.len(), 1);

    d.command(&MarkLessonFree {
        id: lessons[1].id,
        is_free: true,
    })
    .await
    .unwrap();
    assert_eq!(d.query(&GetFreeLessons { course_id: course.id }).await.unwrap().len(), 2);

    d.command(&DeleteLesson { id: lessons[0].id }).await.unwrap();
    let remaining = d.query(&GetCourseLessons { course_id: course.id }).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(
        d.query(&GetCourseById { id: course.id }).await.unwrap().unwrap().lesson_count,
        1
    );
    assert!(!node.stack.cache().local().contains(lessons::id_key(lessons[0].id).as_str()));
}

#[tokio::test]
async fn test_failed_command_keeps_cache() {
    let (_store, node) = single();
    let d = &node.dispatcher;
    let course = published_course(d, "intro-to-rust").await;
    enroll(d, 3, course.id).await;

    let by_user = GetUserEnrollments {
        user_id: 3,
        page: PageRequest::default(),
    };
    d.query(&by_user).await.unwrap();

    let err = d
        .command(&Enroll {
            user_id: 3,
            course_id: course.id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }));
    assert!(node.is_cached(&by_user));

    let err = d
        .command(&UpdateEnrollmentProgress {
            enrollment_id: 999,
            progress_percent: 10,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
    assert!(node.is_cached(&by_user));
}

#[tokio::test]
async fn test_slug_lookup_is_case_insensitive_and_refreshed() {
    let (_store, node) = single();
    let d = &node.dispatcher;
    let course = published_course(d, "intro-to-rust").await;

    let lookup = GetCourseBySlug {
        slug: " Intro-To-Rust ".to_string(),
    };
    assert_eq!(lookup.cache_key(), courses::slug_key("intro-to-rust"));
    assert_eq!(d.query(&lookup).await.unwrap().map(|c| c.id), Some(course.id));

    d.command(&UpdateCourse {
        id: course.id,
        title: "Rust in Depth".to_string(),
        slug: Some("rust-in-depth".to_string()),
        ..UpdateCourse::default()
    })
    .await
    .unwrap();

    assert_eq!(d.query(&lookup).await.unwrap(), None);
}

#[tokio::test]
async fn test_instances_share_l2_and_converge() {
    let store = Arc::new(MemoryStore::new());
    let tier = MemoryTier::new();
    let bus = MemoryInvalidationBus::new();
    let a = Node::new(&store, &tier, &bus);
    let b = Node::new(&store, &tier, &bus);

    let course = published_course(&a.dispatcher, "intro-to-rust").await;
    let query = GetCourseById { id: course.id };

    a.dispatcher.query(&query).await.unwrap();
    let reads = store.reads();
    let seen = b.dispatcher.query(&query).await.unwrap().unwrap();
    assert_eq!(seen.title, "Intro to Rust");
    assert_eq!(store.reads(), reads, "B is served from the shared tier");
    assert!(b.is_cached(&query));

    a.dispatcher
        .command(&UpdateCourse {
            id: course.id,
            title: "Rust in Depth".to_string(),
            ..UpdateCourse::default()
        })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while b.is_cached(&query) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("B dropped the stale course");

    let fresh = b.dispatcher.query(&query).await.unwrap().unwrap();
    assert_eq!(fresh.title, "Rust in Depth");
}

#[tokio::test]
async fn test_bypass_refreshes_list_for_other_callers() {
    let (store, node) = single();
    let d = &node.dispatcher;
    d.command(&CreateCategory {
        name: "Programming".to_string(),
        parent_id: None,
    })
    .await
    .unwrap();
    d.query(&GetCategories::default()).await.unwrap();

    let reads = store.reads();
    let fresh = d
        .query(&GetCategories {
            bypass_cache: true,
            ..GetCategories::default()
        })
        .await
        .unwrap();
    assert_eq!(fresh.total, 1);
    assert_eq!(store.reads(), reads + 1);

    d.query(&GetCategories::default()).await.unwrap();
    assert_eq!(store.reads(), reads + 1);
}

#[tokio::test]
async fn test_enroll_requires_published_course() {
    let (_store, node) = single();
    let d = &node.dispatcher;
    let category = d
        .command(&CreateCategory {
            name: "Programming".to_string(),
            parent_id: None,
        })
        .await
        .unwrap();
    let course = d
        .command(&CreateCourse {
            category_id: category.id,
            title: "Draft".to_string(),
            slug: "draft".to_string(),
            ..CreateCourse::default()
        })
        .await
        .unwrap();

    let err = d
        .command(&Enroll {
            user_id: 1,
            course_id: course.id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(
        enrollments::user_key(1, &PageRequest::default())
            .as_str()
            .starts_with("enrollments:user:1:")
    );
}
