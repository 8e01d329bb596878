//! Per-feature requests with their cache keys and invalidation patterns.

pub mod categories;
pub mod courses;
pub mod enrollments;
pub mod lessons;
