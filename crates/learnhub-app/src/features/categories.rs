//! Category catalog: tree, single category, and paged list.

use async_trait::async_trait;
use learnhub_cache::{CacheKey, CacheableQuery, InvalidatingCommand, InvalidationPattern};

use crate::dispatch::Request;
use crate::error::{AppError, AppResult};
use crate::models::{Category, CategoryId, CategoryNode, Page, PageRequest};
use crate::repository::Repositories;

pub const ENTITY: &str = "categories";

pub fn tree_key() -> CacheKey {
    CacheKey::singleton(ENTITY, "tree")
}

pub fn id_key(id: CategoryId) -> CacheKey {
    CacheKey::builder(ENTITY, "id").id(id).build()
}

pub fn list_key(page: &PageRequest) -> CacheKey {
    let page = page.normalized();
    CacheKey::builder(ENTITY, "list")
        .page(page.page, page.page_size, page.sort.as_deref(), page.search.as_deref())
        .build()
}

/// Patterns every category write invalidates.
fn catalog_patterns() -> Vec<InvalidationPattern> {
    vec![
        tree_key().exact_pattern(),
        InvalidationPattern::selector(ENTITY, "list"),
    ]
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("category name must not be empty"));
    }
    if name.chars().count() > 100 {
        return Err(AppError::validation("category name must be at most 100 characters"));
    }
    Ok(name.to_string())
}

/// The whole category hierarchy.
#[derive(Debug, Clone, Default)]
pub struct GetCategoryTree;

impl CacheableQuery for GetCategoryTree {
    type Output = Vec<CategoryNode>;

    fn cache_key(&self) -> CacheKey {
        tree_key()
    }
}

#[async_trait]
impl Request for GetCategoryTree {
    type Response = Vec<CategoryNode>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let categories = repos.categories.list_all().await?;
        Ok(CategoryNode::build_tree(&categories))
    }
}

#[derive(Debug, Clone)]
pub struct GetCategoryById {
    pub id: CategoryId,
}

impl CacheableQuery for GetCategoryById {
    type Output = Option<Category>;

    fn cache_key(&self) -> CacheKey {
        id_key(self.id)
    }
}

#[async_trait]
impl Request for GetCategoryById {
    type Response = Option<Category>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.categories.get(self.id).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetCategories {
    pub page: PageRequest,
    pub bypass_cache: bool,
}

impl CacheableQuery for GetCategories {
    type Output = Page<Category>;

    fn cache_key(&self) -> CacheKey {
        list_key(&self.page)
    }

    fn bypass_cache(&self) -> bool {
        self.bypass_cache
    }
}

#[async_trait]
impl Request for GetCategories {
    type Response = Page<Category>;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        repos.categories.list(&self.page).await
    }
}

#[derive(Debug, Clone)]
pub struct CreateCategory {
    pub name: String,
    pub parent_id: Option<CategoryId>,
}

impl InvalidatingCommand for CreateCategory {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        catalog_patterns()
    }
}

#[async_trait]
impl Request for CreateCategory {
    type Response = Category;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let name = validate_name(&self.name)?;
        if let Some(parent_id) = self.parent_id
            && repos.categories.get(parent_id).await?.is_none()
        {
            return Err(AppError::not_found("Category", parent_id));
        }
        repos.categories.create(&name, self.parent_id).await
    }
}

#[derive(Debug, Clone)]
pub struct UpdateCategory {
    pub id: CategoryId,
    pub name: String,
    pub parent_id: Option<CategoryId>,
}

impl InvalidatingCommand for UpdateCategory {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        let mut patterns = catalog_patterns();
        patterns.push(id_key(self.id).exact_pattern());
        patterns
    }
}

#[async_trait]
impl Request for UpdateCategory {
    type Response = Category;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let name = validate_name(&self.name)?;
        if self.parent_id == Some(self.id) {
            return Err(AppError::validation("a category cannot be its own parent"));
        }
        let mut category = repos
            .categories
            .get(self.id)
            .await?
            .ok_or_else(|| AppError::not_found("Category", self.id))?;
        category.name = name;
        category.parent_id = self.parent_id;
        repos.categories.update(category).await
    }
}

#[derive(Debug, Clone)]
pub struct DeleteCategory {
    pub id: CategoryId,
}

impl InvalidatingCommand for DeleteCategory {
    type Lookup = Repositories;

    fn invalidation_patterns(&self) -> Vec<InvalidationPattern> {
        let mut patterns = catalog_patterns();
        patterns.push(id_key(self.id).exact_pattern());
        patterns
    }
}

#[async_trait]
impl Request for DeleteCategory {
    type Response = ();

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response> {
        let courses = repos
            .courses
            .list(Some(self.id), &PageRequest::new(1, 1))
            .await?;
        if courses.total > 0 {
            return Err(AppError::validation(format!(
                "category {} still has {} course(s)",
                self.id, courses.total
            )));
        }
        repos.categories.delete(self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(tree_key().as_str(), "categories:tree");
        assert_eq!(id_key(12).as_str(), "categories:id:12");
        assert_eq!(
            list_key(&PageRequest::new(2, 10).searching("  Web   DEV ")).as_str(),
            "categories:list:2:10:_:web dev"
        );
    }

    #[test]
    fn test_update_patterns_include_the_category() {
        let patterns: Vec<String> = UpdateCategory {
            id: 3,
            name: "x".to_string(),
            parent_id: None,
        }
        .invalidation_patterns()
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(patterns, vec!["categories:tree", "categories:list:*", "categories:id:3"]);
    }
}
