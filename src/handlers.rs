use crate::{
    AppState,
    auth::{Principal, SessionToken},
    error::{AppError, RepoError},
    models::{
        CommentForm, LoginForm, LoginQuery, NewUser, PostForm, RegisterForm, User,
        normalize_email,
    },
    outcome::{Flash, Outcome, Page, Redirect, SessionCookie, View},
    policy,
};
use axum::{
    Form,
    extract::{Path, Query, State},
    http::StatusCode,
};

// --- Notices ---

pub const ALREADY_REGISTERED: &str = "You've already signed up with that email, log in instead!";
pub const UNKNOWN_EMAIL: &str = "That email does not exist, please try again.";
pub const WRONG_PASSWORD: &str = "Password incorrect, please try again.";
pub const DUPLICATE_TITLE: &str = "A post with that title already exists.";
pub const PASSWORD_RESET_UNAVAILABLE: &str =
    "Password resets are not available yet, please contact the blog owner.";

// --- Posts ---

/// get_all_posts
///
/// [Public Route] The home page: every post, oldest first.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Index page with all posts"))
)]
pub async fn get_all_posts(
    principal: Principal,
    Flash(notice): Flash,
    State(state): State<AppState>,
) -> Result<Outcome, AppError> {
    let posts = state.repo.list_posts().await?;
    Ok(Page::new(View::Index { posts }, &principal)
        .with_notice(notice)
        .into())
}

/// show_post
///
/// [Public Route] A single post with its comments. An unknown id renders the post
/// template with no post rather than failing.
#[utoipa::path(
    get,
    path = "/post/{id}",
    params(("id" = i32, Path, description = "Post id")),
    responses((status = 200, description = "Post page"))
)]
pub async fn show_post(
    principal: Principal,
    Flash(notice): Flash,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Outcome, AppError> {
    Ok(post_page(&state, &principal, id).await?.with_notice(notice).into())
}

async fn post_page(state: &AppState, principal: &Principal, id: i32) -> Result<Page, AppError> {
    let post = state.repo.get_post(id).await?;
    let comments = match post {
        Some(_) => state.repo.list_comments(id).await?,
        None => Vec::new(),
    };
    Ok(Page::new(View::Post { post, comments }, principal))
}

/// add_comment
///
/// [Authenticated Route] Adds a comment by the current user to a post.
///
/// *Authorization*: anonymous visitors are sent to `/login` with a notice and nothing is
/// written.
#[utoipa::path(
    post,
    path = "/post/{id}",
    params(("id" = i32, Path, description = "Post id")),
    request_body(content = CommentForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Comment added, back to the post"),
        (status = 404, description = "Post not found"),
        (status = 422, description = "Empty comment")
    )
)]
pub async fn add_comment(
    principal: Principal,
    State(state): State<AppState>,
    Path(post_id): Path<i32>,
    Form(form): Form<CommentForm>,
) -> Result<Outcome, AppError> {
    let user = policy::require_user(&principal)?;

    let text = form.validate().map_err(AppError::Validation)?;

    let comment = state.repo.create_comment(text, user.id, post_id).await?;
    tracing::info!(comment_id = comment.id, post_id, user_id = user.id, "comment added");
    Ok(Outcome::redirect(format!("/post/{post_id}")))
}

/// new_post_form
///
/// [Admin Route] The empty create-post form.
#[utoipa::path(
    get,
    path = "/new-post",
    responses(
        (status = 200, description = "Create form"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn new_post_form(principal: Principal) -> Result<Outcome, AppError> {
    policy::require_admin(&principal)?;
    Ok(Page::new(
        View::MakePost {
            form: PostForm::default(),
            editing: None,
        },
        &principal,
    )
    .into())
}

/// create_post
///
/// [Admin Route] Publishes a new post authored by the admin, dated today.
///
/// A duplicate title re-renders the form with a notice; nothing is written.
#[utoipa::path(
    post,
    path = "/new-post",
    request_body(content = PostForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Created, back to the index"),
        (status = 200, description = "Duplicate title, form re-rendered with a notice"),
        (status = 403, description = "Not an admin"),
        (status = 422, description = "Invalid form")
    )
)]
pub async fn create_post(
    principal: Principal,
    State(state): State<AppState>,
    Form(form): Form<PostForm>,
) -> Result<Outcome, AppError> {
    let admin = policy::require_admin(&principal)?;
    let form_page = |form: PostForm| {
        Page::new(
            View::MakePost {
                form,
                editing: None,
            },
            &principal,
        )
    };

    let fields = match form.validate() {
        Ok(fields) => fields,
        Err(errors) => return Ok(form_page(form).with_errors(errors).into()),
    };

    match state.repo.create_post(fields, admin.id).await {
        Ok(post) => {
            tracing::info!(post_id = post.id, author_id = admin.id, "post published");
            Ok(Outcome::redirect("/"))
        }
        Err(RepoError::DuplicateKey { .. }) => {
            Ok(form_page(form).with_notice(DUPLICATE_TITLE.to_string()).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// edit_post_form
///
/// [Admin Route] The edit form, prefilled with the stored post.
#[utoipa::path(
    get,
    path = "/edit-post/{id}",
    params(("id" = i32, Path, description = "Post id")),
    responses(
        (status = 200, description = "Prefilled edit form"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn edit_post_form(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Outcome, AppError> {
    policy::require_admin(&principal)?;
    let post = state.repo.get_post(id).await?.ok_or(AppError::NotFound)?;
    Ok(Page::new(
        View::MakePost {
            form: PostForm::from(&post),
            editing: Some(id),
        },
        &principal,
    )
    .into())
}

/// update_post
///
/// [Admin Route] Replaces title, subtitle, body and image of an existing post. The
/// author and date are kept.
#[utoipa::path(
    post,
    path = "/edit-post/{id}",
    params(("id" = i32, Path, description = "Post id")),
    request_body(content = PostForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Updated, on to the post"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Post not found"),
        (status = 422, description = "Invalid form")
    )
)]
pub async fn update_post(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Form(form): Form<PostForm>,
) -> Result<Outcome, AppError> {
    policy::require_admin(&principal)?;
    let form_page = |form: PostForm| {
        Page::new(
            View::MakePost {
                form,
                editing: Some(id),
            },
            &principal,
        )
    };

    let fields = match form.validate() {
        Ok(fields) => fields,
        Err(errors) => {
            // A missing post stays a 404 even when the form is also invalid.
            if state.repo.get_post(id).await?.is_none() {
                return Err(AppError::NotFound);
            }
            return Ok(form_page(form).with_errors(errors).into());
        }
    };

    match state.repo.update_post(id, fields).await {
        Ok(post) => {
            tracing::info!(post_id = post.id, "post updated");
            Ok(Outcome::redirect(format!("/post/{id}")))
        }
        Err(RepoError::DuplicateKey { .. }) => {
            Ok(form_page(form).with_notice(DUPLICATE_TITLE.to_string()).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// delete_post
///
/// [Admin Route] Deletes a post together with all of its comments.
#[utoipa::path(
    get,
    path = "/delete/{id}",
    params(("id" = i32, Path, description = "Post id")),
    responses(
        (status = 303, description = "Deleted, back to the index"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn delete_post(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Outcome, AppError> {
    let admin = policy::require_admin(&principal)?;
    state.repo.delete_post(id).await?;
    tracing::info!(post_id = id, admin_id = admin.id, "post deleted");
    Ok(Outcome::redirect("/"))
}

// --- Accounts ---

/// register_form
#[utoipa::path(
    get,
    path = "/register",
    responses((status = 200, description = "Registration form"))
)]
pub async fn register_form(principal: Principal, Flash(notice): Flash) -> Outcome {
    Page::new(
        View::Register {
            name: String::new(),
            email: String::new(),
        },
        &principal,
    )
    .with_notice(notice)
    .into()
}

/// register
///
/// [Public Route] Creates an account and logs it in.
///
/// An email that is already registered sends the visitor to `/login` with a notice; no
/// second account is created.
#[utoipa::path(
    post,
    path = "/register",
    request_body(content = RegisterForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Registered and logged in, or email taken"),
        (status = 422, description = "Invalid form")
    )
)]
pub async fn register(
    principal: Principal,
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Result<Outcome, AppError> {
    if let Err(errors) = form.validate() {
        return Ok(Page::new(
            View::Register {
                name: form.name,
                email: form.email,
            },
            &principal,
        )
        .with_errors(errors)
        .into());
    }

    let email = normalize_email(&form.email);
    if state.repo.find_user_by_email(&email).await?.is_some() {
        return Ok(Redirect::to("/login").with_notice(ALREADY_REGISTERED).into());
    }

    let credentials = state.credentials.clone();
    let password = form.password;
    let password_hash = tokio::task::spawn_blocking(move || credentials.hash(&password)).await??;

    let new_user = NewUser {
        name: form.name.trim().to_string(),
        email,
        password_hash,
    };
    let user = match state.repo.create_user(new_user).await {
        Ok(user) => user,
        // Lost a race against a concurrent registration of the same email.
        Err(RepoError::DuplicateKey { .. }) => {
            return Ok(Redirect::to("/login").with_notice(ALREADY_REGISTERED).into());
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(user_id = user.id, role = user.role.as_str(), "account registered");

    start_session(&state, &user)
}

/// login_form
///
/// `?forgot=true` only shows a notice; there is no reset flow.
#[utoipa::path(
    get,
    path = "/login",
    params(LoginQuery),
    responses((status = 200, description = "Login form"))
)]
pub async fn login_form(
    principal: Principal,
    Flash(notice): Flash,
    Query(query): Query<LoginQuery>,
) -> Outcome {
    let notice = if query.forgot.unwrap_or(false) {
        Some(PASSWORD_RESET_UNAVAILABLE.to_string())
    } else {
        notice
    };
    Page::new(
        View::Login {
            email: String::new(),
        },
        &principal,
    )
    .with_notice(notice)
    .into()
}

/// login
///
/// [Public Route] Verifies the credentials and establishes a session.
///
/// A failed attempt re-renders the form (401) with a notice naming which half was
/// wrong, and sets no session cookie.
#[utoipa::path(
    post,
    path = "/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Logged in"),
        (status = 401, description = "Unknown email or wrong password"),
        (status = 422, description = "Invalid form")
    )
)]
pub async fn login(
    principal: Principal,
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Outcome, AppError> {
    let login_page = |email: String| Page::new(View::Login { email }, &principal);

    if let Err(errors) = form.validate() {
        return Ok(login_page(form.email).with_errors(errors).into());
    }

    match authenticate(&state, &form).await {
        Ok(user) => start_session(&state, &user),
        Err(AppError::Authentication(notice)) => Ok(login_page(form.email)
            .with_notice(notice)
            .with_status(StatusCode::UNAUTHORIZED)
            .into()),
        Err(e) => Err(e),
    }
}

async fn authenticate(state: &AppState, form: &LoginForm) -> Result<User, AppError> {
    let email = normalize_email(&form.email);
    let Some(user) = state.repo.find_user_by_email(&email).await? else {
        tracing::info!("login attempt for an unknown email");
        return Err(AppError::Authentication(UNKNOWN_EMAIL.to_string()));
    };

    let credentials = state.credentials.clone();
    let password = form.password.clone();
    let stored = user.password_hash.clone();
    let verified =
        tokio::task::spawn_blocking(move || credentials.verify(&password, &stored)).await?;
    if !verified {
        tracing::info!(user_id = user.id, "login attempt with a wrong password");
        return Err(AppError::Authentication(WRONG_PASSWORD.to_string()));
    }
    Ok(user)
}

fn start_session(state: &AppState, user: &User) -> Result<Outcome, AppError> {
    let token = state.sessions.login(user)?;
    Ok(Redirect::to("/")
        .with_session(SessionCookie::Set {
            token,
            secure: state.config.secure_cookies(),
        })
        .into())
}

/// logout
///
/// Revokes the presented session (if any) and clears the cookie. Always succeeds.
#[utoipa::path(
    get,
    path = "/logout",
    responses((status = 303, description = "Logged out, back to the index"))
)]
pub async fn logout(State(state): State<AppState>, SessionToken(token): SessionToken) -> Outcome {
    if let Some(token) = token {
        state.sessions.logout(&token);
    }
    Redirect::to("/").with_session(SessionCookie::Clear).into()
}

// --- Static pages ---

#[utoipa::path(
    get,
    path = "/about",
    responses((status = 200, description = "About page"))
)]
pub async fn about(principal: Principal) -> Outcome {
    Page::new(View::About, &principal).into()
}

#[utoipa::path(
    get,
    path = "/contact",
    responses((status = 200, description = "Contact page"))
)]
pub async fn contact(principal: Principal) -> Outcome {
    Page::new(View::Contact, &principal).into()
}
