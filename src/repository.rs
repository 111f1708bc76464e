use crate::{
    error::RepoError,
    models::{Comment, NewUser, Post, PostFields, Role, User, format_post_date},
    policy,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use sqlx::{PgPool, Postgres, Transaction};
use std::{collections::BTreeMap, sync::Arc};

/// Repository Trait
///
/// The persistence contract for users, posts and comments. Handlers only ever see this
/// trait, so the Postgres store and the in-memory store are interchangeable.
///
/// Every mutating method is one atomic unit: it either applies completely or leaves the
/// store untouched and returns an error.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    /// Inserts an account. The first account ever created receives the admin role.
    /// Fails with `DuplicateKey { field: "email" }` when the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, RepoError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;
    async fn find_user_by_id(&self, id: i32) -> Result<Option<User>, RepoError>;
    /// Removes an account that authors nothing; `Referenced` otherwise. The admin account
    /// is never removed (`Protected`), so no later registrant can inherit its role.
    async fn delete_user(&self, id: i32) -> Result<(), RepoError>;

    // --- Posts ---
    /// Inserts a post stamped with today's date. `DuplicateKey { field: "title" }` on a
    /// title clash, `NotFound` when the author does not exist.
    async fn create_post(&self, fields: PostFields, author_id: i32) -> Result<Post, RepoError>;
    /// All posts in insertion order.
    async fn list_posts(&self) -> Result<Vec<Post>, RepoError>;
    async fn get_post(&self, id: i32) -> Result<Option<Post>, RepoError>;
    /// Full replace of title, subtitle, body and image. Id, author and date are kept.
    async fn update_post(&self, id: i32, fields: PostFields) -> Result<Post, RepoError>;
    /// Deletes the post's comments and then the post, in one transaction.
    async fn delete_post(&self, id: i32) -> Result<(), RepoError>;

    // --- Comments ---
    async fn create_comment(
        &self,
        text: String,
        author_id: i32,
        post_id: i32,
    ) -> Result<Comment, RepoError>;
    /// Comments on a post in insertion order.
    async fn list_comments(&self, post_id: i32) -> Result<Vec<Comment>, RepoError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the application state.
pub type RepositoryState = Arc<dyn Repository>;

fn today() -> String {
    format_post_date(Utc::now().date_naive())
}

// --- Postgres ---

const USER_COLUMNS: &str = "id, name, email, password, role";

const POST_SELECT: &str = r#"
    SELECT p.id, p.title, p.subtitle, p.body, p.img_url, p.date, p.author_id,
           u.name AS author_name
    FROM blog_posts p
    JOIN users u ON u.id = p.author_id
"#;

/// PostgresRepository
///
/// The production implementation of `Repository`, backed by PostgreSQL. Each mutating
/// method runs inside its own transaction; dropping the transaction on an early `?`
/// rolls it back.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_user(
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
    ) -> Result<(), RepoError> {
        sqlx::query_scalar::<_, i32>("SELECT id FROM users WHERE id = $1 FOR SHARE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .map(|_| ())
            .ok_or(RepoError::NotFound { entity: "user", id })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// create_user
    ///
    /// Takes a table lock before counting existing accounts, so two concurrent first
    /// registrations cannot both become admin.
    async fn create_user(&self, user: NewUser) -> Result<User, RepoError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;
        let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *tx)
            .await?;
        let role = policy::role_for_new_account(existing as usize);

        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, password, role) VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(role.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(user_id = created.id, role = role.as_str(), "user created");
        Ok(created)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, id: i32) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete_user(&self, id: i32) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;

        let role =
            sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(RepoError::NotFound { entity: "user", id })?;
        if role == Role::Admin.as_str() {
            return Err(RepoError::Protected { entity: "user", id });
        }

        let referenced = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (SELECT 1 FROM blog_posts WHERE author_id = $1)
                OR EXISTS (SELECT 1 FROM comments WHERE author_id = $1)
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if referenced {
            return Err(RepoError::Referenced { entity: "user", id });
        }

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(user_id = id, "user deleted");
        Ok(())
    }

    /// create_post
    ///
    /// Inserts and immediately joins with `users` (CTE) to return the author's name.
    async fn create_post(&self, fields: PostFields, author_id: i32) -> Result<Post, RepoError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_user(&mut tx, author_id).await?;

        let post = sqlx::query_as::<_, Post>(
            r#"
            WITH inserted AS (
                INSERT INTO blog_posts (author_id, title, subtitle, date, body, img_url)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, title, subtitle, body, img_url, date, author_id
            )
            SELECT i.id, i.title, i.subtitle, i.body, i.img_url, i.date, i.author_id,
                   u.name AS author_name
            FROM inserted i JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(author_id)
        .bind(&fields.title)
        .bind(&fields.subtitle)
        .bind(today())
        .bind(&fields.body)
        .bind(&fields.img_url)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(post_id = post.id, author_id, "post created");
        Ok(post)
    }

    async fn list_posts(&self) -> Result<Vec<Post>, RepoError> {
        let posts = sqlx::query_as::<_, Post>(&format!("{POST_SELECT} ORDER BY p.id ASC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(posts)
    }

    async fn get_post(&self, id: i32) -> Result<Option<Post>, RepoError> {
        let post = sqlx::query_as::<_, Post>(&format!("{POST_SELECT} WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(post)
    }

    async fn update_post(&self, id: i32, fields: PostFields) -> Result<Post, RepoError> {
        let mut tx = self.pool.begin().await?;

        let post = sqlx::query_as::<_, Post>(
            r#"
            WITH updated AS (
                UPDATE blog_posts
                SET title = $2, subtitle = $3, body = $4, img_url = $5
                WHERE id = $1
                RETURNING id, title, subtitle, body, img_url, date, author_id
            )
            SELECT p.id, p.title, p.subtitle, p.body, p.img_url, p.date, p.author_id,
                   u.name AS author_name
            FROM updated p JOIN users u ON u.id = p.author_id
            "#,
        )
        .bind(id)
        .bind(&fields.title)
        .bind(&fields.subtitle)
        .bind(&fields.body)
        .bind(&fields.img_url)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepoError::NotFound { entity: "post", id })?;

        tx.commit().await?;
        tracing::info!(post_id = id, "post updated");
        Ok(post)
    }

    /// delete_post
    ///
    /// Explicit cascade: the post row is locked, its comments removed, then the post
    /// itself, all inside one transaction.
    async fn delete_post(&self, id: i32) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i32>("SELECT id FROM blog_posts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound { entity: "post", id })?;

        let removed = sqlx::query("DELETE FROM comments WHERE post_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM blog_posts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(post_id = id, comments_removed = removed, "post deleted");
        Ok(())
    }

    async fn create_comment(
        &self,
        text: String,
        author_id: i32,
        post_id: i32,
    ) -> Result<Comment, RepoError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i32>("SELECT id FROM blog_posts WHERE id = $1 FOR SHARE")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "post",
                id: post_id,
            })?;
        Self::lock_user(&mut tx, author_id).await?;

        let comment = sqlx::query_as::<_, Comment>(
            r#"
            WITH inserted AS (
                INSERT INTO comments (text, author_id, post_id) VALUES ($1, $2, $3)
                RETURNING id, text, author_id, post_id
            )
            SELECT i.id, i.text, i.author_id, i.post_id, u.name AS author_name
            FROM inserted i JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(&text)
        .bind(author_id)
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(comment_id = comment.id, post_id, author_id, "comment created");
        Ok(comment)
    }

    async fn list_comments(&self, post_id: i32) -> Result<Vec<Comment>, RepoError> {
        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT c.id, c.text, c.author_id, c.post_id, u.name AS author_name
            FROM comments c
            JOIN users u ON u.id = c.author_id
            WHERE c.post_id = $1
            ORDER BY c.id ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(comments)
    }
}

// --- In-Memory ---

#[derive(Default)]
struct Tables {
    users: BTreeMap<i32, User>,
    posts: BTreeMap<i32, Post>,
    comments: BTreeMap<i32, Comment>,
    // Last id handed out per table; ids are never reused.
    user_seq: i32,
    post_seq: i32,
    comment_seq: i32,
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory, used for local development without a
/// database and for tests. All checks and writes of one operation happen under a single
/// write lock, which gives the same all-or-nothing behaviour as a transaction.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row counts as (users, posts, comments).
    pub fn counts(&self) -> (usize, usize, usize) {
        let t = self.tables.read();
        (t.users.len(), t.posts.len(), t.comments.len())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, RepoError> {
        let mut t = self.tables.write();
        if t.users.values().any(|u| u.email == user.email) {
            return Err(RepoError::DuplicateKey {
                field: "email".to_string(),
            });
        }

        let role = policy::role_for_new_account(t.users.len());
        t.user_seq += 1;
        let created = User {
            id: t.user_seq,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role,
        };
        t.users.insert(created.id, created.clone());
        tracing::info!(user_id = created.id, role = role.as_str(), "user created");
        Ok(created)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let t = self.tables.read();
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: i32) -> Result<Option<User>, RepoError> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn delete_user(&self, id: i32) -> Result<(), RepoError> {
        let mut t = self.tables.write();
        match t.users.get(&id) {
            None => return Err(RepoError::NotFound { entity: "user", id }),
            Some(user) if user.is_admin() => {
                return Err(RepoError::Protected { entity: "user", id });
            }
            Some(_) => {}
        }
        let referenced = t.posts.values().any(|p| p.author_id == id)
            || t.comments.values().any(|c| c.author_id == id);
        if referenced {
            return Err(RepoError::Referenced { entity: "user", id });
        }
        t.users.remove(&id);
        Ok(())
    }

    async fn create_post(&self, fields: PostFields, author_id: i32) -> Result<Post, RepoError> {
        let mut t = self.tables.write();
        let author_name = t
            .users
            .get(&author_id)
            .map(|u| u.name.clone())
            .ok_or(RepoError::NotFound {
                entity: "user",
                id: author_id,
            })?;
        if t.posts.values().any(|p| p.title == fields.title) {
            return Err(RepoError::DuplicateKey {
                field: "title".to_string(),
            });
        }

        t.post_seq += 1;
        let post = Post {
            id: t.post_seq,
            title: fields.title,
            subtitle: fields.subtitle,
            body: fields.body,
            img_url: fields.img_url,
            date: today(),
            author_id,
            author_name,
        };
        t.posts.insert(post.id, post.clone());
        tracing::info!(post_id = post.id, author_id, "post created");
        Ok(post)
    }

    async fn list_posts(&self) -> Result<Vec<Post>, RepoError> {
        Ok(self.tables.read().posts.values().cloned().collect())
    }

    async fn get_post(&self, id: i32) -> Result<Option<Post>, RepoError> {
        Ok(self.tables.read().posts.get(&id).cloned())
    }

    async fn update_post(&self, id: i32, fields: PostFields) -> Result<Post, RepoError> {
        let mut t = self.tables.write();
        if !t.posts.contains_key(&id) {
            return Err(RepoError::NotFound { entity: "post", id });
        }
        if t.posts.values().any(|p| p.id != id && p.title == fields.title) {
            return Err(RepoError::DuplicateKey {
                field: "title".to_string(),
            });
        }

        let post = t
            .posts
            .get_mut(&id)
            .ok_or(RepoError::NotFound { entity: "post", id })?;
        post.title = fields.title;
        post.subtitle = fields.subtitle;
        post.body = fields.body;
        post.img_url = fields.img_url;
        tracing::info!(post_id = id, "post updated");
        Ok(post.clone())
    }

    async fn delete_post(&self, id: i32) -> Result<(), RepoError> {
        let mut t = self.tables.write();
        if t.posts.remove(&id).is_none() {
            return Err(RepoError::NotFound { entity: "post", id });
        }
        let before = t.comments.len();
        t.comments.retain(|_, c| c.post_id != id);
        tracing::info!(post_id = id, comments_removed = before - t.comments.len(), "post deleted");
        Ok(())
    }

    async fn create_comment(
        &self,
        text: String,
        author_id: i32,
        post_id: i32,
    ) -> Result<Comment, RepoError> {
        let mut t = self.tables.write();
        if !t.posts.contains_key(&post_id) {
            return Err(RepoError::NotFound {
                entity: "post",
                id: post_id,
            });
        }
        let author_name = t
            .users
            .get(&author_id)
            .map(|u| u.name.clone())
            .ok_or(RepoError::NotFound {
                entity: "user",
                id: author_id,
            })?;

        t.comment_seq += 1;
        let comment = Comment {
            id: t.comment_seq,
            text,
            author_id,
            post_id,
            author_name,
        };
        t.comments.insert(comment.id, comment.clone());
        tracing::info!(comment_id = comment.id, post_id, author_id, "comment created");
        Ok(comment)
    }

    async fn list_comments(&self, post_id: i32) -> Result<Vec<Comment>, RepoError> {
        let t = self.tables.read();
        Ok(t.comments
            .values()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect())
    }
}
