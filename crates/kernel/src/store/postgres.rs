//! PostgreSQL post store.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{PostStore, StoreError};
use crate::models::Post;

const POST_COLUMNS: &str =
    "id, owner_id, title, content, tags, version, created_at, updated_at";

/// Post store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn create(&self, post: &Post) -> Result<Uuid, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, owner_id, title, content, tags, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(post.id)
        .bind(&post.owner_id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.tags)
        .bind(post.version)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(post.id)
    }

    async fn read(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
        let post = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(post)
    }

    async fn update(&self, post: &Post) -> Result<Post, StoreError> {
        let updated = sqlx::query_as::<_, Post>(&format!(
            r#"
            UPDATE posts
            SET title = $1, content = $2, tags = $3, updated_at = $4, version = version + 1
            WHERE id = $5 AND version = $6
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.tags)
        .bind(post.updated_at)
        .bind(post.id)
        .bind(post.version)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(updated) = updated {
            return Ok(updated);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
            .bind(post.id)
            .fetch_one(&self.pool)
            .await?;

        if exists {
            Err(StoreError::Conflict(post.id))
        } else {
            Err(StoreError::NotFound(post.id))
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> bool {
        crate::db::check_health(&self.pool).await
    }
}

impl std::fmt::Debug for PgPostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPostStore").finish()
    }
}
