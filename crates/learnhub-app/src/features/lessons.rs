//! Lessons of a course, including the free preview list.

use async_trait::async_trait;
use learnhub_cache::{
    CacheKey, CacheableQuery, InvalidatingCommand, InvalidationPattern, ResolutionTiming,
};

use crate::dispatch::Request;
use crate::error::{AppError, AppResult};
use crate::features::courses;
use crate::models::{CourseId, Lesson, LessonId};
use crate::repository::Repositories;

pub const ENTITY: &str = "lessons";

pub fn id_key(id: LessonId) -> CacheKey {
    CacheKey::builder(ENTITY, "id").id(id).build()
}

pub fn course_key(course_id: CourseId) -> CacheKey {
    CacheKey::builder(ENTITY, "course").id(course_id).build()
}

pub fn free_key(course_id: CourseId) -> CacheKey {
    CacheKey::builder(ENTITY, "free").id(course_id).build()
}

/// Lesson lists of one course.
fn list_patterns(course_id: CourseId) -> Vec<InvalidationPattern> {
    vec![
        course_key(course_id).exact_pattern(),
        free_key(course_id).exact_pattern(),
    ]
}

/// Creating or deleting a lesson changes the course's lesson count, which
/// every cached view of the course carries.
fn membership_patterns(course_id: CourseId) -> Vec<InvalidationPattern> {
    let mut patterns = list_patterns(course_id);
    patterns.extend(courses::course_views(course_id));
    patterns
}

fn lesson_patterns(lesson: &Lesson) -> Vec<InvalidationPattern> {
    let mut patterns = vec![id_key(lesson.id).exact_pattern()];
    patterns.extend(list_patterns(lesson.course_id));
    patterns.push(courses::id_key(lesson.course_id).exact_pattern());
    patterns
}

fn delete_patterns(lesson: &Lesson) -> Vec<InvalidationPattern> {
    let mut patterns = vec![id_key(lesson.id).exact_pattern()];
    patterns.extend(membership_patterns(lesson.course_id));
    patterns
}

async fn resolve(
    repos: &Repositories,
    id: LessonId,
    patterns: fn(&Lesson) -> Vec<InvalidationPattern>,
) -> anyhow::Result<Vec<InvalidationPattern>> {
    let lesson = repos
        .lessons
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Lesson", id))?;
    Ok(patterns(&lesson))
}

async fn load(repos: &Repositories, id: LessonId) -> AppResult<Lesson> {
    repos
        .lessons
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Lesson", id))
}

#[derive(Debug, Clone)]
pub struct GetLessonById {
    pub id: LessonId,
}

impl CacheableQuery for GetLessonById {
    type Output = Option<Lesson>;

    fn cache_key(&self) -> CacheKey {
        id_key(self.id)
    }
}

#[async_trait]
impl Request for GetLessonById {
    type Response = Option<Lesson>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.lessons.get(self.id).await
    }
}

#[derive(Debug, Clone)]
pub struct GetCourseLessons {
    pub course_id: CourseId,
}

impl CacheableQuery for GetCourseLessons {
    type Output = Vec<Lesson>;

    fn cache_key(&self) -> CacheKey {
        course_key(self.course_id)
    }
}

#[async_trait]
impl Request for GetCourseLessons {
    type Response = Vec<Lesson>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.lessons.list_by_course(self.course_id).await
    }
}

/// Lessons of a course that are open without enrollment.
#[derive(Debug, Clone)]
pub struct GetFreeLessons {
    pub course_id: CourseId,
}

impl CacheableQuery for GetFreeLessons {
    type Output = Vec<Lesson>;

    fn cache_key(&self) -> CacheKey {
        free_key(self.course_id)
    }
}

#[async_trait]
impl Request for GetFreeLessons {
    type Response = Vec<Lesson>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let mut lessons = repos.lessons.list_by_course(self.course_id).await?;
        lessons.retain(|l| l.is_free);
        Ok(lessons)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateLesson {
    pub course_id: CourseId,
    pub title: String,
    pub content: String,
    pub position: u32,
    pub is_free: bool,
}

impl InvalidatingCommand for CreateLesson {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        membership_patterns(self.course_id)
    }
}

#[async_trait]
impl Request for CreateLesson {
    type Response = Lesson;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("lesson title must not be empty"));
        }
        repos
            .lessons
            .create(Lesson {
                course_id: self.course_id,
                title: title.to_string(),
                content: self.content.clone(),
                position: self.position,
                is_free: self.is_free,
                ..Lesson::default()
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub struct UpdateLesson {
    pub id: LessonId,
    pub title: String,
    pub content: String,
    pub position: u32,
}

#[async_trait]
impl InvalidatingCommand for UpdateLesson {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        vec![InvalidationPattern::entity(ENTITY)]
    }

    fn resolution_timing(&self) -> ResolutionTiming {
        ResolutionTiming::AfterWrite
    }

    async fn resolve_patterns(&self, repos: &Repositories) -> anyhow::Result<Vec<InvalidationPattern>> {
        resolve(repos, self.id, lesson_patterns).await
    }
}

#[async_trait]
impl Request for UpdateLesson {
    type Response = Lesson;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("lesson title must not be empty"));
        }
        let mut lesson = load(repos, self.id).await?;
        lesson.title = title.to_string();
        lesson.content = self.content.clone();
        lesson.position = self.position;
        repos.lessons.update(lesson).await
    }
}

#[derive(Debug, Clone)]
pub struct MarkLessonFree {
    pub id: LessonId,
    pub is_free: bool,
}

#[async_trait]
impl InvalidatingCommand for MarkLessonFree {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        vec![InvalidationPattern::entity(ENTITY)]
    }

    fn resolution_timing(&self) -> ResolutionTiming {
        ResolutionTiming::AfterWrite
    }

    async fn resolve_patterns(&self, repos: &Repositories) -> anyhow::Result<Vec<InvalidationPattern>> {
        resolve(repos, self.id, lesson_patterns).await
    }
}

#[async_trait]
impl Request for MarkLessonFree {
    type Response = Lesson;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let mut lesson = load(repos, self.id).await?;
        lesson.is_free = self.is_free;
        repos.lessons.update(lesson).await
    }
}

#[derive(Debug, Clone)]
pub struct DeleteLesson {
    pub id: LessonId,
}

#[async_trait]
impl InvalidatingCommand for DeleteLesson {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        vec![InvalidationPattern::entity(ENTITY)]
    }

    fn resolution_timing(&self) -> ResolutionTiming {
        ResolutionTiming::BeforeWrite
    }

    async fn resolve_patterns(&self, repos: &Repositories) -> anyhow::Result<Vec<InvalidationPattern>> {
        resolve(repos, self.id, delete_patterns).await
    }
}

#[async_trait]
impl Request for DeleteLesson {
    type Response = ();

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.lessons.delete(self.id).await
    }
}
