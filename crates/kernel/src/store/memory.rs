//! In-process post store.
//!
//! Same contract as the PostgreSQL store, kept in a `DashMap`. Counts reads
//! so callers can observe whether a lookup reached the store. An outage can
//! be simulated with [`MemoryPostStore::set_available`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::{PostStore, StoreError};
use crate::models::Post;

#[derive(Debug)]
pub struct MemoryPostStore {
    posts: DashMap<Uuid, Post>,
    reads: AtomicUsize,
    available: AtomicBool,
}

impl Default for MemoryPostStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self {
            posts: DashMap::new(),
            reads: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Number of `read` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Toggle simulated availability. While unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn create(&self, post: &Post) -> Result<Uuid, StoreError> {
        self.check_available()?;
        match self.posts.entry(post.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(post.id)),
            Entry::Vacant(slot) => {
                slot.insert(post.clone());
                Ok(post.id)
            }
        }
    }

    async fn read(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.posts.get(&id).map(|p| p.clone()))
    }

    async fn update(&self, post: &Post) -> Result<Post, StoreError> {
        self.check_available()?;
        let Some(mut stored) = self.posts.get_mut(&post.id) else {
            return Err(StoreError::NotFound(post.id));
        };
        if stored.version != post.version {
            return Err(StoreError::Conflict(post.id));
        }

        let mut next = post.clone();
        next.version = stored.version + 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.posts.remove(&id).is_some())
    }

    async fn ping(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
