//! Entity DTOs as returned by queries and stored in the cache.
//!
//! Every type derives `Default` so an empty cache payload decodes to a value.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use learnhub_cache::keys::normalize_text;

pub type CategoryId = u64;
pub type CourseId = u64;
pub type EnrollmentId = u64;
pub type LessonId = u64;
pub type UserId = u64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub parent_id: Option<CategoryId>,
    pub name: String,
}

/// A category with its descendants, as served by the tree query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Build the forest rooted at categories without a (known) parent.
    pub fn build_tree(categories: &[Category]) -> Vec<CategoryNode> {
        fn children_of(parent: Option<CategoryId>, all: &[Category]) -> Vec<CategoryNode> {
            all.iter()
                .filter(|c| c.parent_id == parent)
                .map(|c| CategoryNode {
                    category: c.clone(),
                    children: children_of(Some(c.id), all),
                })
                .collect()
        }

        let mut roots = children_of(None, categories);
        // Orphans (parent deleted) are promoted to roots.
        for orphan in categories.iter().filter(|c| {
            c.parent_id
                .is_some_and(|p| !categories.iter().any(|other| other.id == p))
        }) {
            roots.push(CategoryNode {
                category: orphan.clone(),
                children: children_of(Some(orphan.id), categories),
            });
        }
        roots
    }

    /// Number of categories in this subtree, including its root.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(CategoryNode::size).sum::<usize>()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub category_id: CategoryId,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub price_cents: u64,
    pub published: bool,
    pub enrollment_count: u32,
    pub lesson_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub progress_percent: u8,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub enrolled_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub course_id: CourseId,
    pub title: String,
    pub content: String,
    pub position: u32,
    pub is_free: bool,
}

/// Paging, ordering and search parameters of a list query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
    /// Any non-empty value orders by the item's display text; a leading `-`
    /// sorts descending.
    pub sort: Option<String>,
    pub search: Option<String>,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: None,
            search: None,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn searching(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Page clamped to at least 1, size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
            sort: self.sort.clone(),
            search: self.search.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Filter, order and slice `items` (already in id order) per `request`.
    ///
    /// `text` gives the searchable/sortable text of an item.
    pub fn paginate(mut items: Vec<T>, request: &PageRequest, text: impl Fn(&T) -> &str) -> Self {
        let request = request.normalized();

        if let Some(search) = request.search.as_deref().map(normalize_text)
            && !search.is_empty()
        {
            items.retain(|item| normalize_text(text(item)).contains(&search));
        }

        if let Some(sort) = request.sort.as_deref().map(str::trim)
            && !sort.is_empty()
        {
            let descending = sort.starts_with('-');
            items.sort_by_key(|item| normalize_text(text(item)));
            if descending {
                items.reverse();
            }
        }

        let total = items.len();
        let skip = (request.page as usize - 1).saturating_mul(request.page_size as usize);
        let items = items
            .into_iter()
            .skip(skip)
            .take(request.page_size as usize)
            .collect();

        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
        }
    }
}
