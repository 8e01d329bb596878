//! Demo catalog loaded by `learnhub serve`.

use learnhub_app::Dispatcher;
use learnhub_app::features::categories::CreateCategory;
use learnhub_app::features::courses::{CreateCourse, PublishCourse};
use learnhub_app::features::lessons::CreateLesson;

const CATALOG: &[(&str, &[(&str, &str, u64)])] = &[
    (
        "Programming",
        &[
            ("Intro to Rust", "intro-to-rust", 4900),
            ("Async Rust in Practice", "async-rust", 7900),
        ],
    ),
    ("Data", &[("SQL Fundamentals", "sql-fundamentals", 2900)]),
    ("Design", &[]),
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub categories: usize,
    pub courses: usize,
    pub lessons: usize,
}

/// Create the demo categories, courses and lessons through the dispatcher,
/// so every write goes through the invalidation path like a real one.
pub async fn demo_catalog(dispatcher: &Dispatcher) -> anyhow::Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for (name, courses) in CATALOG {
        let category = dispatcher
            .command(&CreateCategory {
                name: (*name).to_string(),
                parent_id: None,
            })
            .await?;
        summary.categories += 1;

        for (title, slug, price_cents) in *courses {
            let course = dispatcher
                .command(&CreateCourse {
                    category_id: category.id,
                    title: (*title).to_string(),
                    slug: (*slug).to_string(),
                    description: format!("{title}, from first steps to a finished project."),
                    price_cents: *price_cents,
                })
                .await?;
            summary.courses += 1;

            for position in 1..=3u32 {
                dispatcher
                    .command(&CreateLesson {
                        course_id: course.id,
                        title: format!("{title}: part {position}"),
                        content: String::new(),
                        position,
                        is_free: position == 1,
                    })
                    .await?;
                summary.lessons += 1;
            }

            dispatcher
                .command(&PublishCourse {
                    id: course.id,
                    published: true,
                })
                .await?;
        }
    }

    tracing::info!(
        categories = summary.categories,
        courses = summary.courses,
        lessons = summary.lessons,
        "demo catalog seeded"
    );
    Ok(summary)
}
