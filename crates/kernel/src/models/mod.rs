//! Data models.

pub mod post;

pub use post::{NewPost, Post, PostPatch, parse_post_id};
