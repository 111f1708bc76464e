use blog_portal::{
    error::RepoError,
    models::{NewUser, PostFields, Role, User},
    repository::{InMemoryRepository, PostgresRepository, Repository},
};
use serial_test::serial;
use sqlx::PgPool;
use tokio::test;

// --- Test Context and Setup ---

/// Holds the database pool for the Postgres-backed runs.
struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    /// Connects, migrates and empties the tables. Returns `None` (and the Postgres half
    /// of a test is skipped) when DATABASE_URL is not set.
    async fn setup() -> Option<Self> {
        dotenv::dotenv().ok();
        let Ok(db_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping Postgres repository checks");
            return None;
        };

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        sqlx::query("TRUNCATE comments, blog_posts, users RESTART IDENTITY")
            .execute(&pool)
            .await
            .expect("Failed to reset tables.");

        Some(DbTestContext { pool })
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

/// Runs `check` against a fresh in-memory store, then against Postgres when available.
macro_rules! for_each_repository {
    ($check:ident) => {{
        $check(&InMemoryRepository::new()).await;
        if let Some(ctx) = DbTestContext::setup().await {
            $check(&ctx.repository()).await;
        }
    }};
}

fn new_user(name: &str, email: &str) -> NewUser {
    NewUser {
        name: name.to_string(),
        email: email.to_string(),
        password_hash: "$argon2id$v=19$m=64,t=1,p=1$c2FsdHNhbHQ$aGFzaGhhc2g".to_string(),
    }
}

fn fields(title: &str) -> PostFields {
    PostFields {
        title: title.to_string(),
        subtitle: "Sub".to_string(),
        body: "<p>Body</p>".to_string(),
        img_url: "https://images.example.com/a.jpg".to_string(),
    }
}

async fn admin(repo: &dyn Repository) -> User {
    repo.create_user(new_user("Angela", "angela@example.com"))
        .await
        .unwrap()
}

// --- Checks ---

async fn email_is_unique(repo: &dyn Repository) {
    admin(repo).await;
    let err = repo
        .create_user(new_user("Impostor", "angela@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::DuplicateKey { ref field } if field == "email"));

    // Only the original row exists.
    let stored = repo
        .find_user_by_email("angela@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.name, "Angela");
    assert!(repo.find_user_by_id(stored.id + 1).await.unwrap().is_none());
}

async fn first_account_is_the_only_admin(repo: &dyn Repository) {
    let first = admin(repo).await;
    let second = repo
        .create_user(new_user("Bob", "bob@example.com"))
        .await
        .unwrap();
    let third = repo
        .create_user(new_user("Cleo", "cleo@example.com"))
        .await
        .unwrap();

    assert_eq!(first.role, Role::Admin);
    assert_eq!(second.role, Role::Member);
    assert_eq!(third.role, Role::Member);
    assert_eq!(
        repo.find_user_by_id(first.id).await.unwrap().unwrap().role,
        Role::Admin
    );
}

async fn title_is_unique(repo: &dyn Repository) {
    let author = admin(repo).await;
    let original = repo.create_post(fields("Same"), author.id).await.unwrap();
    assert_eq!(original.author_name, "Angela");
    assert!(!original.date.is_empty());

    let err = repo.create_post(fields("Same"), author.id).await.unwrap_err();
    assert!(matches!(err, RepoError::DuplicateKey { ref field } if field == "title"));
    assert_eq!(repo.list_posts().await.unwrap().len(), 1);

    // Renaming onto another post's title clashes too; keeping one's own title does not.
    let other = repo.create_post(fields("Other"), author.id).await.unwrap();
    let err = repo.update_post(other.id, fields("Same")).await.unwrap_err();
    assert!(matches!(err, RepoError::DuplicateKey { .. }));
    assert!(repo.update_post(other.id, fields("Other")).await.is_ok());
}

async fn update_keeps_identity_author_and_date(repo: &dyn Repository) {
    let author = admin(repo).await;
    let post = repo.create_post(fields("Before"), author.id).await.unwrap();

    let mut changed = fields("After");
    changed.body = "<p>New body</p>".to_string();
    let updated = repo.update_post(post.id, changed).await.unwrap();

    assert_eq!(updated.id, post.id);
    assert_eq!(updated.author_id, post.author_id);
    assert_eq!(updated.date, post.date);
    assert_eq!(updated.title, "After");
    assert_eq!(updated.body, "<p>New body</p>");
    assert_eq!(repo.get_post(post.id).await.unwrap(), Some(updated));

    let err = repo.update_post(post.id + 100, fields("Ghost")).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound { entity: "post", .. }));
}

async fn delete_post_leaves_no_orphans(repo: &dyn Repository) {
    let author = admin(repo).await;
    let reader = repo
        .create_user(new_user("Bob", "bob@example.com"))
        .await
        .unwrap();
    let doomed = repo.create_post(fields("Doomed"), author.id).await.unwrap();
    let kept = repo.create_post(fields("Kept"), author.id).await.unwrap();

    for text in ["one", "two", "three"] {
        repo.create_comment(text.to_string(), reader.id, doomed.id)
            .await
            .unwrap();
    }
    repo.create_comment("stays".to_string(), reader.id, kept.id)
        .await
        .unwrap();

    repo.delete_post(doomed.id).await.unwrap();

    assert!(repo.get_post(doomed.id).await.unwrap().is_none());
    assert!(repo.list_comments(doomed.id).await.unwrap().is_empty());
    let remaining = repo.list_comments(kept.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].author_name, "Bob");

    let err = repo.delete_post(doomed.id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound { entity: "post", .. }));

    // Ids are never reused.
    let next = repo.create_post(fields("Next"), author.id).await.unwrap();
    assert!(next.id > kept.id);
}

async fn comments_need_existing_post_and_author(repo: &dyn Repository) {
    let author = admin(repo).await;
    let post = repo.create_post(fields("Post"), author.id).await.unwrap();

    let err = repo
        .create_comment("x".to_string(), author.id, post.id + 50)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound { entity: "post", .. }));

    let err = repo
        .create_comment("x".to_string(), author.id + 50, post.id)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound { entity: "user", .. }));
    assert!(repo.list_comments(post.id).await.unwrap().is_empty());

    let first = repo
        .create_comment("first".to_string(), author.id, post.id)
        .await
        .unwrap();
    let second = repo
        .create_comment("second".to_string(), author.id, post.id)
        .await
        .unwrap();
    let listed = repo.list_comments(post.id).await.unwrap();
    assert_eq!(listed, vec![first, second]);
}

async fn referenced_user_cannot_be_deleted(repo: &dyn Repository) {
    let author = admin(repo).await;
    let commenter = repo
        .create_user(new_user("Bob", "bob@example.com"))
        .await
        .unwrap();
    let idle = repo
        .create_user(new_user("Idle", "idle@example.com"))
        .await
        .unwrap();
    let post = repo.create_post(fields("Mine"), author.id).await.unwrap();
    repo.create_comment("hi".to_string(), commenter.id, post.id)
        .await
        .unwrap();

    let err = repo.delete_user(commenter.id).await.unwrap_err();
    assert!(matches!(err, RepoError::Referenced { entity: "user", .. }));
    assert!(repo.find_user_by_id(commenter.id).await.unwrap().is_some());

    repo.delete_user(idle.id).await.unwrap();
    assert!(repo.find_user_by_id(idle.id).await.unwrap().is_none());

    let err = repo.delete_user(idle.id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound { entity: "user", .. }));
}

async fn admin_role_is_never_granted_twice(repo: &dyn Repository) {
    // An admin who has authored nothing still cannot be removed.
    let first = admin(repo).await;
    let err = repo.delete_user(first.id).await.unwrap_err();
    assert!(matches!(err, RepoError::Protected { entity: "user", .. }));
    assert_eq!(
        repo.find_user_by_id(first.id).await.unwrap().unwrap().role,
        Role::Admin
    );

    // Removing a member does not reopen the admin slot either.
    let member = repo
        .create_user(new_user("Bob", "bob@example.com"))
        .await
        .unwrap();
    repo.delete_user(member.id).await.unwrap();
    let later = repo
        .create_user(new_user("Cleo", "cleo@example.com"))
        .await
        .unwrap();
    assert_eq!(later.role, Role::Member);
}

async fn posts_list_in_insertion_order(repo: &dyn Repository) {
    let author = admin(repo).await;
    for title in ["a", "c", "b"] {
        repo.create_post(fields(title), author.id).await.unwrap();
    }
    let titles: Vec<String> = repo
        .list_posts()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.title)
        .collect();
    assert_eq!(titles, ["a", "c", "b"]);
}

// --- Tests ---

#[test]
#[serial]
async fn test_email_is_unique() {
    for_each_repository!(email_is_unique);
}

#[test]
#[serial]
async fn test_first_account_is_the_only_admin() {
    for_each_repository!(first_account_is_the_only_admin);
}

#[test]
#[serial]
async fn test_title_is_unique() {
    for_each_repository!(title_is_unique);
}

#[test]
#[serial]
async fn test_update_keeps_identity_author_and_date() {
    for_each_repository!(update_keeps_identity_author_and_date);
}

#[test]
#[serial]
async fn test_delete_post_leaves_no_orphans() {
    for_each_repository!(delete_post_leaves_no_orphans);
}

#[test]
#[serial]
async fn test_comments_need_existing_post_and_author() {
    for_each_repository!(comments_need_existing_post_and_author);
}

#[test]
#[serial]
async fn test_referenced_user_cannot_be_deleted() {
    for_each_repository!(referenced_user_cannot_be_deleted);
}

#[test]
#[serial]
async fn test_admin_role_is_never_granted_twice() {
    for_each_repository!(admin_role_is_never_granted_twice);
}

#[test]
#[serial]
async fn test_posts_list_in_insertion_order() {
    for_each_repository!(posts_list_in_insertion_order);
}
