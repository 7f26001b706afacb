//! Development data generator.

use anyhow::{Result, bail};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::info;

use crate::models::{NewPost, Post};
use crate::store::PostStore;

const TITLES: &[&str] = &[
    "Morning notes",
    "What I learned this week",
    "A short rant about build times",
    "Reading list",
    "Weekend project",
    "Release day",
    "Things nobody told me about caching",
    "Field notes from the conference",
];

const SENTENCES: &[&str] = &[
    "Started the day with a long walk and too much coffee.",
    "The benchmark numbers finally make sense.",
    "Turns out the bug was in the config all along.",
    "Shipped a small fix and it felt great.",
    "Still not sure which approach is better here.",
    "Spent an hour on naming, worth it.",
    "The queue drained faster than expected.",
    "Writing this down so I remember next time.",
];

const TAGS: &[&str] = &["rust", "backend", "life", "notes", "ops", "reading", "music", "travel"];

/// Generate `count` posts spread across `owners` owners (`user-1` ...).
pub fn generate_posts(count: usize, owners: usize) -> Result<Vec<Post>> {
    if owners == 0 {
        bail!("at least one owner is required");
    }

    let mut rng = rand::thread_rng();
    let posts = (0..count)
        .map(|_| {
            let owner = format!("user-{}", rng.gen_range(1..=owners));
            let sentences = rng.gen_range(1..=4);
            let content = (0..sentences)
                .filter_map(|_| SENTENCES.choose(&mut rng).copied())
                .collect::<Vec<_>>()
                .join(" ");
            let tag_count = rng.gen_range(0..=3);
            let tags = TAGS
                .choose_multiple(&mut rng, tag_count)
                .map(|t| (*t).to_string())
                .collect();
            let title = TITLES.choose(&mut rng).copied().unwrap_or("Untitled");

            Post::new(
                &owner,
                NewPost {
                    title: title.to_string(),
                    content,
                    tags,
                },
            )
        })
        .collect();
    Ok(posts)
}

/// Insert generated posts into `store`, returning how many were written.
pub async fn seed(store: &dyn PostStore, count: usize, owners: usize) -> Result<usize> {
    let posts = generate_posts(count, owners)?;
    for post in &posts {
        store.create(post).await?;
    }
    info!(count = posts.len(), owners, "seeded posts");
    Ok(posts.len())
}
