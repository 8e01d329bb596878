//! Enrollments: who takes which course, and how far they got.
//!
//! Progress updates and cancellations only know the enrollment id, so the
//! user and course scoped keys they affect are found through the enrollment
//! repository. Updates look the enrollment up after the write (it still
//! exists); cancellations look it up before, since the write removes it.

use async_trait::async_trait;
use learnhub_cache::{
    CacheKey, CacheableQuery, InvalidatingCommand, InvalidationPattern, ResolutionTiming,
};

use crate::dispatch::Request;
use crate::error::{AppError, AppResult};
use crate::features::courses;
use crate::models::{CourseId, Enrollment, EnrollmentId, Page, PageRequest, UserId};
use crate::repository::Repositories;

pub const ENTITY: &str = "enrollments";

pub fn id_key(id: EnrollmentId) -> CacheKey {
    CacheKey::builder(ENTITY, "id").id(id).build()
}

pub fn user_key(user_id: UserId, page: &PageRequest) -> CacheKey {
    let page = page.normalized();
    CacheKey::builder(ENTITY, "user")
        .id(user_id)
        .page(page.page, page.page_size, page.sort.as_deref(), page.search.as_deref())
        .build()
}

pub fn course_key(course_id: CourseId, page: &PageRequest) -> CacheKey {
    let page = page.normalized();
    CacheKey::builder(ENTITY, "course")
        .id(course_id)
        .page(page.page, page.page_size, page.sort.as_deref(), page.search.as_deref())
        .build()
}

/// Enrollment lists of one user and one course.
fn list_patterns(user_id: UserId, course_id: CourseId) -> Vec<InvalidationPattern> {
    vec![
        CacheKey::builder(ENTITY, "user").id(user_id).wildcard(),
        CacheKey::builder(ENTITY, "course").id(course_id).wildcard(),
    ]
}

/// Enrolling or cancelling changes the course's enrollment count, which
/// every cached view of the course carries.
fn membership_patterns(user_id: UserId, course_id: CourseId) -> Vec<InvalidationPattern> {
    let mut patterns = list_patterns(user_id, course_id);
    patterns.extend(courses::course_views(course_id));
    patterns
}

fn progress_patterns(enrollment: &Enrollment) -> Vec<InvalidationPattern> {
    let mut patterns = list_patterns(enrollment.user_id, enrollment.course_id);
    patterns.push(courses::id_key(enrollment.course_id).exact_pattern());
    patterns.push(id_key(enrollment.id).exact_pattern());
    patterns
}

fn cancel_patterns(enrollment: &Enrollment) -> Vec<InvalidationPattern> {
    let mut patterns = membership_patterns(enrollment.user_id, enrollment.course_id);
    patterns.push(id_key(enrollment.id).exact_pattern());
    patterns
}

async fn resolve(
    repos: &Repositories,
    id: EnrollmentId,
    patterns: fn(&Enrollment) -> Vec<InvalidationPattern>,
) -> anyhow::Result<Vec<InvalidationPattern>> {
    let enrollment = repos
        .enrollments
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Enrollment", id))?;
    Ok(patterns(&enrollment))
}

#[derive(Debug, Clone)]
pub struct GetEnrollmentById {
    pub id: EnrollmentId,
}

impl CacheableQuery for GetEnrollmentById {
    type Output = Option<Enrollment>;

    fn cache_key(&self) -> CacheKey {
        id_key(self.id)
    }
}

#[async_trait]
impl Request for GetEnrollmentById {
    type Response = Option<Enrollment>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.enrollments.get(self.id).await
    }
}

#[derive(Debug, Clone)]
pub struct GetUserEnrollments {
    pub user_id: UserId,
    pub page: PageRequest,
}

impl CacheableQuery for GetUserEnrollments {
    type Output = Page<Enrollment>;

    fn cache_key(&self) -> CacheKey {
        user_key(self.user_id, &self.page)
    }
}

#[async_trait]
impl Request for GetUserEnrollments {
    type Response = Page<Enrollment>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.enrollments.list_by_user(self.user_id, &self.page).await
    }
}

#[derive(Debug, Clone)]
pub struct GetCourseEnrollments {
    pub course_id: CourseId,
    pub page: PageRequest,
}

impl CacheableQuery for GetCourseEnrollments {
    type Output = Page<Enrollment>;

    fn cache_key(&self) -> CacheKey {
        course_key(self.course_id, &self.page)
    }
}

#[async_trait]
impl Request for GetCourseEnrollments {
    type Response = Page<Enrollment>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.enrollments.list_by_course(self.course_id, &self.page).await
    }
}

#[derive(Debug, Clone)]
pub struct Enroll {
    pub user_id: UserId,
    pub course_id: CourseId,
}

impl InvalidatingCommand for Enroll {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        membership_patterns(self.user_id, self.course_id)
    }
}

#[async_trait]
impl Request for Enroll {
    type Response = Enrollment;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let course = repos
            .courses
            .get(self.course_id)
            .await?
            .ok_or_else(|| AppError::not_found("Course", self.course_id))?;
        if !course.published {
            return Err(AppError::validation(format!(
                "course {} is not published",
                self.course_id
            )));
        }
        repos.enrollments.enroll(self.user_id, self.course_id).await
    }
}

#[derive(Debug, Clone)]
pub struct UpdateEnrollmentProgress {
    pub enrollment_id: EnrollmentId,
    pub progress_percent: u8,
}

#[async_trait]
impl InvalidatingCommand for UpdateEnrollmentProgress {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        vec![InvalidationPattern::entity(ENTITY)]
    }

    fn resolution_timing(&self) -> ResolutionTiming {
        ResolutionTiming::AfterWrite
    }

    async fn resolve_patterns(&self, repos: &Repositories) -> anyhow::Result<Vec<InvalidationPattern>> {
        resolve(repos, self.enrollment_id, progress_patterns).await
    }
}

#[async_trait]
impl Request for UpdateEnrollmentProgress {
    type Response = Enrollment;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        if self.progress_percent > 100 {
            return Err(AppError::validation(format!(
                "progress must be between 0 and 100, got {}",
                self.progress_percent
            )));
        }
        repos
            .enrollments
            .set_progress(self.enrollment_id, self.progress_percent)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct CancelEnrollment {
    pub enrollment_id: EnrollmentId,
}

#[async_trait]
impl InvalidatingCommand for CancelEnrollment {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        vec![InvalidationPattern::entity(ENTITY)]
    }

    fn resolution_timing(&self) -> ResolutionTiming {
        ResolutionTiming::BeforeWrite
    }

    async fn resolve_patterns(&self, repos: &Repositories) -> anyhow::Result<Vec<InvalidationPattern>> {
        resolve(repos, self.enrollment_id, cancel_patterns).await
    }
}

#[async_trait]
impl Request for CancelEnrollment {
    type Response = ();

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.enrollments.cancel(self.enrollment_id).await
    }
}
