use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};

// --- Core Application Schemas (Mapped to Database) ---

/// Role
///
/// The explicit permission attribute carried by every account. The first account ever
/// registered is created as `Admin`; every later registration is a `Member`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Admin,
    #[default]
    Member,
}

/// Raised when the `users.role` column holds a value this build does not know.
#[derive(Debug, Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            _ => Err(UnknownRole(value)),
        }
    }
}

/// User
///
/// A registered account from the `users` table. The password column only ever holds
/// the PHC-formatted Argon2 credential and is never serialized.
#[derive(Debug, Clone, Serialize, FromRow, Default, PartialEq)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    #[sqlx(rename = "password")]
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Post
///
/// A blog post from the `blog_posts` table, joined with its author's display name.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Post {
    pub id: i32,
    pub title: String,
    pub subtitle: String,
    /// Rich text, stored and returned as-is.
    pub body: String,
    pub img_url: String,
    /// Publication day, e.g. "April 03, 2024". Set once at creation.
    pub date: String,
    // FK to users.id (non-owning).
    pub author_id: i32,
    // Loaded via a JOIN in the repository query.
    pub author_name: String,
}

/// Comment
///
/// A comment from the `comments` table, joined with its author's display name.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Comment {
    pub id: i32,
    pub text: String,
    pub author_id: i32,
    pub post_id: i32,
    pub author_name: String,
}

/// NewUser
///
/// Everything the repository needs to insert an account. The role is decided by the
/// repository inside the insert transaction.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// PostFields
///
/// The mutable part of a post. Creation and edit both take the full set; an edit is a
/// full replace and never touches id, author or date.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostFields {
    pub title: String,
    pub subtitle: String,
    pub body: String,
    pub img_url: String,
}

/// Formats a publication day the way posts display it: "April 03, 2024".
pub fn format_post_date(date: NaiveDate) -> String {
    date.format("%B %d, %Y").to_string()
}

/// Emails are compared case-insensitively: trimmed and lower-cased before storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// --- Request Payloads (Form Schemas) ---

/// FieldError
///
/// A single field-level validation message, rendered next to the offending input.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

const REQUIRED: &str = "This field is required.";

fn require(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, REQUIRED));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), Vec<FieldError>> {
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// PostForm
///
/// Form payload for creating (POST /new-post) or editing (POST /edit-post/{id}) a post.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct PostForm {
    pub title: String,
    pub subtitle: String,
    pub img_url: String,
    pub body: String,
}

impl PostForm {
    /// Every field is required and the cover image must be an absolute http(s) URL.
    pub fn validate(&self) -> Result<PostFields, Vec<FieldError>> {
        let mut errors = Vec::new();
        require(&mut errors, "title", &self.title);
        require(&mut errors, "subtitle", &self.subtitle);
        require(&mut errors, "img_url", &self.img_url);
        require(&mut errors, "body", &self.body);

        if !self.img_url.trim().is_empty() {
            let valid = url::Url::parse(self.img_url.trim())
                .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
                .unwrap_or(false);
            if !valid {
                errors.push(FieldError::new("img_url", "Invalid URL."));
            }
        }

        finish(errors)?;
        Ok(PostFields {
            title: self.title.trim().to_string(),
            subtitle: self.subtitle.trim().to_string(),
            body: self.body.clone(),
            img_url: self.img_url.trim().to_string(),
        })
    }
}

impl From<&Post> for PostForm {
    /// Prefills the edit form with the stored post.
    fn from(post: &Post) -> Self {
        Self {
            title: post.title.clone(),
            subtitle: post.subtitle.clone(),
            img_url: post.img_url.clone(),
            body: post.body.clone(),
        }
    }
}

/// RegisterForm
///
/// Form payload for POST /register. The password is hashed immediately and never
/// persisted or logged in clear.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        require(&mut errors, "email", &self.email);
        require(&mut errors, "password", &self.password);
        require(&mut errors, "name", &self.name);
        if !self.email.trim().is_empty() && !looks_like_email(&self.email) {
            errors.push(FieldError::new("email", "Invalid email address."));
        }
        finish(errors)
    }
}

/// LoginForm
///
/// Form payload for POST /login.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        require(&mut errors, "email", &self.email);
        require(&mut errors, "password", &self.password);
        finish(errors)
    }
}

/// LoginQuery
///
/// Query parameters accepted by GET /login. `forgot=true` only shows a notice.
#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    pub forgot: Option<bool>,
}

/// CommentForm
///
/// Form payload for posting a comment on a post (POST /post/{id}).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct CommentForm {
    pub text: String,
}

impl CommentForm {
    pub fn validate(&self) -> Result<String, Vec<FieldError>> {
        let mut errors = Vec::new();
        require(&mut errors, "text", &self.text);
        finish(errors)?;
        Ok(self.text.clone())
    }
}

fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
