use blog_portal::{
    AppConfig, AppState, create_router, outcome::FLASH_COOKIE, repository::InMemoryRepository,
};
use reqwest::{Response, StatusCode, header, redirect::Policy};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct TestApp {
    pub address: String,
    pub repo: Arc<InMemoryRepository>,
    pub client: reqwest::Client,
}

async fn spawn_app() -> TestApp {
    let repo = Arc::new(InMemoryRepository::new());
    let config = AppConfig {
        argon2_memory_kib: 64,
        argon2_iterations: 1,
        ..AppConfig::default()
    };
    let state = AppState::new(config, repo.clone()).expect("valid test cost");
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Redirects are part of what is under test, so they are never followed.
    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap();

    TestApp {
        address,
        repo,
        client,
    }
}

impl TestApp {
    async fn get(&self, path: &str, token: Option<&str>) -> Response {
        let mut request = self.client.get(format!("{}{}", self.address, path));
        if let Some(token) = token {
            request = request.header(header::COOKIE, format!("session={token}"));
        }
        request.send().await.expect("GET failed")
    }

    async fn post_form(&self, path: &str, token: Option<&str>, form: &[(&str, &str)]) -> Response {
        let mut request = self
            .client
            .post(format!("{}{}", self.address, path))
            .form(form);
        if let Some(token) = token {
            request = request.header(header::COOKIE, format!("session={token}"));
        }
        request.send().await.expect("POST failed")
    }

    /// Registers an account and returns its session token.
    async fn register(&self, name: &str, email: &str, password: &str) -> String {
        let response = self
            .post_form(
                "/register",
                None,
                &[("name", name), ("email", email), ("password", password)],
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        cookie(&response, "session").expect("registration sets a session cookie")
    }
}

fn location(response: &Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

fn cookie(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|c| c.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn new_post<'a>(title: &'a str) -> [(&'static str, &'a str); 4] {
    [
        ("title", title),
        ("subtitle", "Who knew that cacti lived such interesting lives."),
        ("img_url", "https://images.example.com/cactus.jpg"),
        ("body", "<p>Nori grape silver beet broccoli.</p>"),
    ]
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let response = app.get("/health", None).await;
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let app = spawn_app().await;
    let response = app.get("/api-docs/openapi.json", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = response.json().await.unwrap();
    for path in ["/", "/post/{id}", "/new-post", "/edit-post/{id}", "/delete/{id}", "/login"] {
        assert!(doc["paths"].get(path).is_some(), "missing {path}");
    }
}

#[tokio::test]
async fn test_blog_lifecycle() {
    let app = spawn_app().await;

    // 1. The first registrant administers the blog.
    let admin = app.register("Angela", "angela@example.com", "pw-admin").await;
    let index: Value = app.get("/", Some(&admin)).await.json().await.unwrap();
    assert_eq!(index["template"], "index");
    assert_eq!(index["viewer"]["is_admin"], true);

    // 2. Admin publishes a post.
    let response = app
        .post_form("/new-post", Some(&admin), &new_post("The Life of Cactus"))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    let index: Value = app.get("/", None).await.json().await.unwrap();
    let post_id = index["posts"][0]["id"].as_i64().unwrap();
    assert_eq!(index["posts"][0]["author_name"], "Angela");

    // 3. A second registrant is a member and may comment.
    let member = app.register("Bob", "bob@example.com", "pw-member").await;
    let member_view: Value = app.get("/", Some(&member)).await.json().await.unwrap();
    assert_eq!(member_view["viewer"]["logged_in"], true);
    assert_eq!(member_view["viewer"]["is_admin"], false);

    let post_path = format!("/post/{post_id}");
    let response = app
        .post_form(&post_path, Some(&member), &[("text", "Great read!")])
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), post_path);

    let page: Value = app.get(&post_path, None).await.json().await.unwrap();
    assert_eq!(page["template"], "post");
    assert_eq!(page["post"]["title"], "The Life of Cactus");
    assert_eq!(page["comments"][0]["text"], "Great read!");
    assert_eq!(page["comments"][0]["author_name"], "Bob");

    // 4. The member cannot manage posts.
    let forbidden = [
        app.get("/new-post", Some(&member)).await,
        app.get(&format!("/edit-post/{post_id}"), Some(&member)).await,
        app.post_form(&format!("/edit-post/{post_id}"), Some(&member), &new_post("Hijacked"))
            .await,
        app.get(&format!("/delete/{post_id}"), Some(&member)).await,
    ];
    for response in forbidden {
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
    assert_eq!(app.repo.counts(), (2, 1, 1));

    // 5. The admin edits, then deletes the post along with its comment.
    let response = app
        .post_form(
            &format!("/edit-post/{post_id}"),
            Some(&admin),
            &new_post("The Secret Life of Cactus"),
        )
        .await;
    assert_eq!(location(&response), post_path);

    let response = app.get(&format!("/delete/{post_id}"), Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    assert_eq!(app.repo.counts(), (2, 0, 0));

    let page: Value = app.get(&post_path, None).await.json().await.unwrap();
    assert!(page["post"].is_null());

    let response = app.get(&format!("/delete/{post_id}"), Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_anonymous_comment_is_sent_to_login() {
    let app = spawn_app().await;
    let admin = app.register("Angela", "angela@example.com", "pw").await;
    app.post_form("/new-post", Some(&admin), &new_post("Open"))
        .await;

    let response = app.post_form("/post/1", None, &[("text", "hi")]).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    let flash = cookie(&response, FLASH_COOKIE).expect("notice carried in a cookie");
    assert_eq!(app.repo.counts().2, 0);

    // The login page shows the notice once and clears it.
    let response = app
        .client
        .get(format!("{}/login", app.address))
        .header(header::COOKIE, format!("{FLASH_COOKIE}={flash}"))
        .send()
        .await
        .unwrap();
    let cleared = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .any(|v| v.to_str().unwrap().starts_with("flash=;"));
    assert!(cleared);
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["notice"], "You need to login or register to comment.");
}

#[tokio::test]
async fn test_duplicate_registration() {
    let app = spawn_app().await;
    app.register("Angela", "angela@example.com", "pw").await;

    let response = app
        .post_form(
            "/register",
            None,
            &[("name", "Again"), ("email", "angela@example.com"), ("password", "pw2")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    assert!(cookie(&response, "session").is_none());
    assert!(cookie(&response, FLASH_COOKIE).is_some());
    assert_eq!(app.repo.counts().0, 1);
}

#[tokio::test]
async fn test_email_case_does_not_matter() {
    let app = spawn_app().await;
    app.register("Angela", "X@Y.com", "pw").await;

    let response = app
        .post_form(
            "/register",
            None,
            &[("name", "Again"), ("email", " x@y.COM "), ("password", "pw2")],
        )
        .await;
    assert_eq!(location(&response), "/login");
    assert_eq!(app.repo.counts().0, 1);

    let response = app
        .post_form("/login", None, &[("email", "x@Y.cOm"), ("password", "pw")])
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let token = cookie(&response, "session").expect("mixed-case login succeeds");
    let page: Value = app.get("/", Some(&token)).await.json().await.unwrap();
    assert_eq!(page["viewer"]["name"], "Angela");
}

#[tokio::test]
async fn test_wrong_password_leaves_visitor_anonymous() {
    let app = spawn_app().await;
    app.register("Angela", "angela@example.com", "right").await;

    let response = app
        .post_form(
            "/login",
            None,
            &[("email", "angela@example.com"), ("password", "wrong")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(cookie(&response, "session").is_none());
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["notice"], "Password incorrect, please try again.");
    assert_eq!(page["viewer"]["logged_in"], false);

    let response = app
        .post_form(
            "/login",
            None,
            &[("email", "angela@example.com"), ("password", "right")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(cookie(&response, "session").is_some());
}

#[tokio::test]
async fn test_logout_ends_the_session() {
    let app = spawn_app().await;
    let token = app.register("Angela", "angela@example.com", "pw").await;

    let response = app.get("/logout", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    let cleared = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .any(|v| v.to_str().unwrap().starts_with("session=;"));
    assert!(cleared);

    // The old token no longer authenticates, even if a client keeps sending it.
    let page: Value = app.get("/", Some(&token)).await.json().await.unwrap();
    assert_eq!(page["viewer"]["logged_in"], false);
    let response = app.get("/new-post", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
