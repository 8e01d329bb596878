//! Courses: lookup by id or slug, paged lists, authoring and publishing.

use async_trait::async_trait;
use learnhub_cache::keys::normalize_text;
use learnhub_cache::{CacheKey, CacheableQuery, InvalidatingCommand, InvalidationPattern};

use crate::dispatch::Request;
use crate::error::{AppError, AppResult};
use crate::models::{CategoryId, Course, CourseId, Page, PageRequest};
use crate::repository::Repositories;

pub const ENTITY: &str = "courses";

pub fn id_key(id: CourseId) -> CacheKey {
    CacheKey::builder(ENTITY, "id").id(id).build()
}

pub fn slug_key(slug: &str) -> CacheKey {
    CacheKey::builder(ENTITY, "slug").text(Some(slug)).build()
}

pub fn list_key(page: &PageRequest) -> CacheKey {
    let page = page.normalized();
    CacheKey::builder(ENTITY, "list")
        .page(page.page, page.page_size, page.sort.as_deref(), page.search.as_deref())
        .build()
}

pub fn category_key(category_id: CategoryId, page: &PageRequest) -> CacheKey {
    let page = page.normalized();
    CacheKey::builder(ENTITY, "category")
        .id(category_id)
        .page(page.page, page.page_size, page.sort.as_deref(), page.search.as_deref())
        .build()
}

/// Patterns for anything that changes what appears in course listings.
fn listing_patterns() -> Vec<InvalidationPattern> {
    vec![
        InvalidationPattern::selector(ENTITY, "list"),
        InvalidationPattern::selector(ENTITY, "category"),
    ]
}

/// Every cached view that embeds course `id`: listings, the course itself
/// and its slug lookups. Slug keys are purged wholesale since the slug is not
/// known without a lookup.
pub fn course_views(id: CourseId) -> Vec<InvalidationPattern> {
    let mut patterns = listing_patterns();
    patterns.push(id_key(id).exact_pattern());
    patterns.push(InvalidationPattern::selector(ENTITY, "slug"));
    patterns
}

/// Lower-case, hyphen-separated slug; rejects anything that normalizes to nothing.
fn normalize_slug(slug: &str) -> AppResult<String> {
    let slug = normalize_text(slug)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        return Err(AppError::validation("course slug must contain letters or digits"));
    }
    Ok(slug)
}

fn validate_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::validation("course title must not be empty"));
    }
    Ok(title.to_string())
}

async fn load(repos: &Repositories, id: CourseId) -> AppResult<Course> {
    repos
        .courses
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Course", id))
}

#[derive(Debug, Clone)]
pub struct GetCourseById {
    pub id: CourseId,
}

impl CacheableQuery for GetCourseById {
    type Output = Option<Course>;

    fn cache_key(&self) -> CacheKey {
        id_key(self.id)
    }
}

#[async_trait]
impl Request for GetCourseById {
    type Response = Option<Course>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.courses.get(self.id).await
    }
}

#[derive(Debug, Clone)]
pub struct GetCourseBySlug {
    pub slug: String,
}

impl CacheableQuery for GetCourseBySlug {
    type Output = Option<Course>;

    fn cache_key(&self) -> CacheKey {
        slug_key(&self.slug)
    }
}

#[async_trait]
impl Request for GetCourseBySlug {
    type Response = Option<Course>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        match normalize_slug(&self.slug) {
            Ok(slug) => repos.courses.get_by_slug(&slug).await,
            Err(_) => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetCourses {
    pub page: PageRequest,
    pub bypass_cache: bool,
}

impl CacheableQuery for GetCourses {
    type Output = Page<Course>;

    fn cache_key(&self) -> CacheKey {
        list_key(&self.page)
    }

    fn bypass_cache(&self) -> bool {
        self.bypass_cache
    }
}

#[async_trait]
impl Request for GetCourses {
    type Response = Page<Course>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.courses.list(None, &self.page).await
    }
}

#[derive(Debug, Clone)]
pub struct GetCategoryCourses {
    pub category_id: CategoryId,
    pub page: PageRequest,
}

impl CacheableQuery for GetCategoryCourses {
    type Output = Page<Course>;

    fn cache_key(&self) -> CacheKey {
        category_key(self.category_id, &self.page)
    }
}

#[async_trait]
impl Request for GetCategoryCourses {
    type Response = Page<Course>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.courses.list(Some(self.category_id), &self.page).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateCourse {
    pub category_id: CategoryId,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub price_cents: u64,
}

impl InvalidatingCommand for CreateCourse {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        listing_patterns()
    }
}

#[async_trait]
impl Request for CreateCourse {
    type Response = Course;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let title = validate_title(&self.title)?;
        let slug = normalize_slug(&self.slug)?;
        if repos.categories.get(self.category_id).await?.is_none() {
            return Err(AppError::not_found("Category", self.category_id));
        }
        repos
            .courses
            .create(Course {
                category_id: self.category_id,
                title,
                slug,
                description: self.description.trim().to_string(),
                price_cents: self.price_cents,
                ..Course::default()
            })
            .await
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateCourse {
    pub id: CourseId,
    pub title: String,
    pub slug: Option<String>,
    pub description: String,
    pub price_cents: u64,
}

impl InvalidatingCommand for UpdateCourse {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        course_views(self.id)
    }
}

#[async_trait]
impl Request for UpdateCourse {
    type Response = Course;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let title = validate_title(&self.title)?;
        let mut course = load(repos, self.id).await?;
        if let Some(slug) = &self.slug {
            course.slug = normalize_slug(slug)?;
        }
        course.title = title;
        course.description = self.description.trim().to_string();
        course.price_cents = self.price_cents;
        repos.courses.update(course).await
    }
}

#[derive(Debug, Clone)]
pub struct PublishCourse {
    pub id: CourseId,
    pub published: bool,
}

impl InvalidatingCommand for PublishCourse {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        course_views(self.id)
    }
}

#[async_trait]
impl Request for PublishCourse {
    type Response = Course;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let mut course = load(repos, self.id).await?;
        if self.published && course.lesson_count == 0 {
            return Err(AppError::validation(format!(
                "course {} has no lessons and cannot be published",
                self.id
            )));
        }
        course.published = self.published;
        repos.courses.update(course).await
    }
}
