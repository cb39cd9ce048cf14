use chrono::Utc;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{NewPost, Post, PostRow, StoreError};

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Insert one post and return its id.
    ///
    /// # Errors
    ///
    /// `StoreError::UniqueViolation` when a post with the same link exists,
    /// for this feed or any other.
    pub async fn insert_post(&self, post: &NewPost) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
                INSERT INTO posts (feed_id, title, url, description, published_at, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post.feed_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(post.published_at.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recently published posts, optionally restricted to one feed.
    pub async fn recent_posts(
        &self,
        feed_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Post>, StoreError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT id, feed_id, title, url, description, published_at, created_at FROM posts",
        );
        if let Some(feed_id) = feed_id {
            builder.push(" WHERE feed_id = ");
            builder.push_bind(feed_id);
        }
        builder.push(" ORDER BY published_at DESC, id DESC LIMIT ");
        builder.push_bind(limit);

        let rows: Vec<PostRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }
}
