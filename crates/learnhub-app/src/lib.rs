//! LearnHub application layer.
//!
//! Requests are plain structs implementing [`Request`]; reads opt into
//! caching with [`learnhub_cache::CacheableQuery`] and writes declare what
//! they make stale with [`learnhub_cache::InvalidatingCommand`]. The
//! [`Dispatcher`] routes both through the cache pipeline, so handlers never
//! touch the cache.

pub mod dispatch;
pub mod error;
pub mod features;
pub mod memory;
pub mod models;
pub mod repository;

pub use dispatch::{Dispatcher, Request};
pub use error::{AppError, AppResult};
pub use memory::MemoryStore;
pub use repository::{
    CategoryRepository, CourseRepository, EnrollmentRepository, LessonRepository, Repositories,
};
