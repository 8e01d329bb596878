//! Data-store interfaces consumed by request handlers and by invalidation
//! pattern resolution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{
    Category, CategoryId, Course, CourseId, Enrollment, EnrollmentId, Lesson, LessonId, Page,
    PageRequest, UserId,
};

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn list_all(&self) -> AppResult<Vec<Category>>;
    async fn get(&self, id: CategoryId) -> AppResult<Option<Category>>;
    async fn list(&self, page: &PageRequest) -> AppResult<Page<Category>>;
    async fn create(&self, name: &str, parent_id: Option<CategoryId>) -> AppResult<Category>;
    async fn update(&self, category: Category) -> AppResult<Category>;
    async fn delete(&self, id: CategoryId) -> AppResult<()>;
}

#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn get(&self, id: CourseId) -> AppResult<Option<Course>>;
    async fn get_by_slug(&self, slug: &str) -> AppResult<Option<Course>>;
    async fn list(&self, category_id: Option<CategoryId>, page: &PageRequest) -> AppResult<Page<Course>>;
    /// Insert a new course; `course.id` is assigned by the store.
    async fn create(&self, course: Course) -> AppResult<Course>;
    async fn update(&self, course: Course) -> AppResult<Course>;
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    async fn get(&self, id: EnrollmentId) -> AppResult<Option<Enrollment>>;
    async fn list_by_user(&self, user_id: UserId, page: &PageRequest) -> AppResult<Page<Enrollment>>;
    async fn list_by_course(&self, course_id: CourseId, page: &PageRequest) -> AppResult<Page<Enrollment>>;
    /// Fails with a conflict when the user is already enrolled.
    async fn enroll(&self, user_id: UserId, course_id: CourseId) -> AppResult<Enrollment>;
    async fn set_progress(&self, id: EnrollmentId, progress_percent: u8) -> AppResult<Enrollment>;
    async fn cancel(&self, id: EnrollmentId) -> AppResult<()>;
}

#[async_trait]
pub trait LessonRepository: Send + Sync {
    async fn get(&self, id: LessonId) -> AppResult<Option<Lesson>>;
    /// Lessons of a course in position order.
    async fn list_by_course(&self, course_id: CourseId) -> AppResult<Vec<Lesson>>;
    async fn create(&self, lesson: Lesson) -> AppResult<Lesson>;
    async fn update(&self, lesson: Lesson) -> AppResult<Lesson>;
    async fn delete(&self, id: LessonId) -> AppResult<()>;
}

/// The repositories handed to request handlers and pattern resolvers.
#[derive(Clone)]
pub struct Repositories {
    pub categories: Arc<dyn CategoryRepository>,
    pub courses: Arc<dyn CourseRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub lessons: Arc<dyn LessonRepository>,
}

impl Repositories {
    /// All four repositories served by one store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CategoryRepository + CourseRepository + EnrollmentRepository + LessonRepository + 'static,
    {
        Self {
            categories: store.clone(),
            courses: store.clone(),
            enrollments: store.clone(),
            lessons: store,
        }
    }
}
