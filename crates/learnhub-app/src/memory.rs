//! In-memory data store implementing every repository.
//!
//! Used by tests and by the local runtime. Reads are counted so callers can
//! tell whether a request reached the store or was served from cache.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};
use crate::models::{
    Category, CategoryId, Course, CourseId, Enrollment, EnrollmentId, Lesson, LessonId, Page,
    PageRequest, UserId,
};
use crate::repository::{
    CategoryRepository, CourseRepository, EnrollmentRepository, LessonRepository,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    categories: DashMap<CategoryId, Category>,
    courses: DashMap<CourseId, Course>,
    enrollments: DashMap<EnrollmentId, Enrollment>,
    lessons: DashMap<LessonId, Lesson>,
    next_id: AtomicU64,
    reads: AtomicUsize,
    /// Serializes check-then-write sequences (slug and enrollment uniqueness,
    /// counters on courses).
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read operations served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| AppError::storage("memory store write lock poisoned"))
    }

    fn sorted<K, V: Clone>(map: &DashMap<K, V>, keep: impl Fn(&V) -> bool, id: impl Fn(&V) -> u64) -> Vec<V>
    where
        K: Eq + std::hash::Hash,
    {
        let mut values: Vec<V> = map
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        values.sort_by_key(|v| id(v));
        values
    }

    fn adjust_course(&self, course_id: CourseId, adjust: impl FnOnce(&mut Course)) {
        if let Some(mut course) = self.courses.get_mut(&course_id) {
            adjust(&mut course);
        }
    }
}

#[async_trait]
impl CategoryRepository for MemoryStore {
    async fn list_all(&self) -> AppResult<Vec<Category>> {
        self.read();
        Ok(Self::sorted(&self.categories, |_| true, |c| c.id))
    }

    async fn get(&self, id: CategoryId) -> AppResult<Option<Category>> {
        self.read();
        Ok(self.categories.get(&id).map(|c| c.clone()))
    }

    async fn list(&self, page: &PageRequest) -> AppResult<Page<Category>> {
        self.read();
        let all = Self::sorted(&self.categories, |_| true, |c| c.id);
        Ok(Page::paginate(all, page, |c| c.name.as_str()))
    }

    async fn create(&self, name: &str, parent_id: Option<CategoryId>) -> AppResult<Category> {
        let category = Category {
            id: self.next_id(),
            parent_id,
            name: name.to_string(),
        };
        self.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn update(&self, category: Category) -> AppResult<Category> {
        let mut stored = self
            .categories
            .get_mut(&category.id)
            .ok_or_else(|| AppError::not_found("Category", category.id))?;
        *stored = category.clone();
        Ok(category)
    }

    async fn delete(&self, id: CategoryId) -> AppResult<()> {
        self.categories
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("Category", id))
    }
}

#[async_trait]
impl CourseRepository for MemoryStore {
    async fn get(&self, id: CourseId) -> AppResult<Option<Course>> {
        self.read();
        Ok(self.courses.get(&id).map(|c| c.clone()))
    }

    async fn get_by_slug(&self, slug: &str) -> AppResult<Option<Course>> {
        self.read();
        Ok(self
            .courses
            .iter()
            .find(|c| c.slug.eq_ignore_ascii_case(slug.trim()))
            .map(|c| c.value().clone()))
    }

    async fn list(&self, category_id: Option<CategoryId>, page: &PageRequest) -> AppResult<Page<Course>> {
        self.read();
        let all = Self::sorted(
            &self.courses,
            |c| category_id.is_none_or(|id| c.category_id == id),
            |c| c.id,
        );
        Ok(Page::paginate(all, page, |c| c.title.as_str()))
    }

    async fn create(&self, mut course: Course) -> AppResult<Course> {
        let _guard = self.lock()?;
        if self.courses.iter().any(|c| c.slug.eq_ignore_ascii_case(&course.slug)) {
            return Err(AppError::conflict("Course", &course.slug));
        }
        course.id = self.next_id();
        course.enrollment_count = 0;
        course.lesson_count = 0;
        self.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn update(&self, course: Course) -> AppResult<Course> {
        let _guard = self.lock()?;
        if self
            .courses
            .iter()
            .any(|c| c.id != course.id && c.slug.eq_ignore_ascii_case(&course.slug))
        {
            return Err(AppError::conflict("Course", &course.slug));
        }
        let mut stored = self
            .courses
            .get_mut(&course.id)
            .ok_or_else(|| AppError::not_found("Course", course.id))?;
        *stored = course.clone();
        Ok(course)
    }
}

#[async_trait]
impl EnrollmentRepository for MemoryStore {
    async fn get(&self, id: EnrollmentId) -> AppResult<Option<Enrollment>> {
        self.read();
        Ok(self.enrollments.get(&id).map(|e| e.clone()))
    }

    async fn list_by_user(&self, user_id: UserId, page: &PageRequest) -> AppResult<Page<Enrollment>> {
        self.read();
        let all = Self::sorted(&self.enrollments, |e| e.user_id == user_id, |e| e.id);
        Ok(Page::paginate(all, page, |_| ""))
    }

    async fn list_by_course(&self, course_id: CourseId, page: &PageRequest) -> AppResult<Page<Enrollment>> {
        self.read();
        let all = Self::sorted(&self.enrollments, |e| e.course_id == course_id, |e| e.id);
        Ok(Page::paginate(all, page, |_| ""))
    }

    async fn enroll(&self, user_id: UserId, course_id: CourseId) -> AppResult<Enrollment> {
        let _guard = self.lock()?;
        if !self.courses.contains_key(&course_id) {
            return Err(AppError::not_found("Course", course_id));
        }
        if self
            .enrollments
            .iter()
            .any(|e| e.user_id == user_id && e.course_id == course_id)
        {
            return Err(AppError::conflict(
                "Enrollment",
                format!("user {user_id} / course {course_id}"),
            ));
        }

        let enrollment = Enrollment {
            id: self.next_id(),
            user_id,
            course_id,
            progress_percent: 0,
            enrolled_at: Some(OffsetDateTime::now_utc()),
            completed_at: None,
        };
        self.enrollments.insert(enrollment.id, enrollment.clone());
        self.adjust_course(course_id, |c| c.enrollment_count += 1);
        Ok(enrollment)
    }

    async fn set_progress(&self, id: EnrollmentId, progress_percent: u8) -> AppResult<Enrollment> {
        let mut enrollment = self
            .enrollments
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Enrollment", id))?;
        enrollment.progress_percent = progress_percent;
        enrollment.completed_at = match (progress_percent, enrollment.completed_at) {
            (100, None) => Some(OffsetDateTime::now_utc()),
            (100, done) => done,
            _ => None,
        };
        Ok(enrollment.clone())
    }

    async fn cancel(&self, id: EnrollmentId) -> AppResult<()> {
        let _guard = self.lock()?;
        let (_, enrollment) = self
            .enrollments
            .remove(&id)
            .ok_or_else(|| AppError::not_found("Enrollment", id))?;
        self.adjust_course(enrollment.course_id, |c| {
            c.enrollment_count = c.enrollment_count.saturating_sub(1)
        });
        Ok(())
    }
}

#[async_trait]
impl LessonRepository for MemoryStore {
    async fn get(&self, id: LessonId) -> AppResult<Option<Lesson>> {
        self.read();
        Ok(self.lessons.get(&id).map(|l| l.clone()))
    }

    async fn list_by_course(&self, course_id: CourseId) -> AppResult<Vec<Lesson>> {
        self.read();
        let mut lessons = Self::sorted(&self.lessons, |l| l.course_id == course_id, |l| l.id);
        lessons.sort_by_key(|l| l.position);
        Ok(lessons)
    }

    async fn create(&self, mut lesson: Lesson) -> AppResult<Lesson> {
        let _guard = self.lock()?;
        if !self.courses.contains_key(&lesson.course_id) {
            return Err(AppError::not_found("Course", lesson.course_id));
        }
        lesson.id = self.next_id();
        self.lessons.insert(lesson.id, lesson.clone());
        self.adjust_course(lesson.course_id, |c| c.lesson_count += 1);
        Ok(lesson)
    }

    async fn update(&self, lesson: Lesson) -> AppResult<Lesson> {
        let mut stored = self
            .lessons
            .get_mut(&lesson.id)
            .ok_or_else(|| AppError::not_found("Lesson", lesson.id))?;
        *stored = lesson.clone();
        Ok(lesson)
    }

    async fn delete(&self, id: LessonId) -> AppResult<()> {
        let _guard = self.lock()?;
        let (_, lesson) = self
            .lessons
            .remove(&id)
            .ok_or_else(|| AppError::not_found("Lesson", id))?;
        self.adjust_course(lesson.course_id, |c| {
            c.lesson_count = c.lesson_count.saturating_sub(1)
        });
        Ok(())
    }
}
