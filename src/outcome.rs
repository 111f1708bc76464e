use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::convert::Infallible;

use crate::{
    auth::{Principal, SESSION_COOKIE, cookie_value},
    models::{Comment, FieldError, Post, PostForm},
    policy,
};

/// Name of the cookie carrying a one-shot notice across a redirect.
pub const FLASH_COOKIE: &str = "flash";

/// Viewer
///
/// What every page needs to know about the visitor: whether to offer login/logout links
/// and whether to show the admin controls.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct Viewer {
    pub logged_in: bool,
    pub is_admin: bool,
    pub user_id: Option<i32>,
    pub name: Option<String>,
}

impl From<&Principal> for Viewer {
    fn from(principal: &Principal) -> Self {
        match principal.user() {
            Some(user) => Viewer {
                logged_in: true,
                is_admin: policy::is_admin(principal),
                user_id: Some(user.id),
                name: Some(user.name.clone()),
            },
            None => Viewer::default(),
        }
    }
}

/// View
///
/// The template a page renders and the data it receives.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "template", rename_all = "kebab-case")]
pub enum View {
    Index {
        posts: Vec<Post>,
    },
    /// `post` is `None` when the requested id does not exist.
    Post {
        post: Option<Post>,
        comments: Vec<Comment>,
    },
    /// The create/edit form; `editing` holds the post id when editing.
    MakePost {
        form: PostForm,
        editing: Option<i32>,
    },
    /// Never echoes the password back.
    Register {
        name: String,
        email: String,
    },
    Login {
        email: String,
    },
    About,
    Contact,
}

/// Page
///
/// A render directive: the view, the viewer, an optional notice and any field-level
/// validation messages. Serialized as the JSON body handed to the template layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page {
    #[serde(flatten)]
    pub view: View,
    pub viewer: Viewer,
    pub notice: Option<String>,
    pub errors: Vec<FieldError>,
    #[serde(skip)]
    pub status: StatusCode,
}

impl Page {
    pub fn new(view: View, principal: &Principal) -> Self {
        Self {
            view,
            viewer: Viewer::from(principal),
            notice: None,
            errors: Vec::new(),
            status: StatusCode::OK,
        }
    }

    pub fn with_notice(mut self, notice: impl Into<Option<String>>) -> Self {
        self.notice = notice.into();
        self
    }

    pub fn with_errors(mut self, errors: Vec<FieldError>) -> Self {
        self.errors = errors;
        self
    }

    /// Overrides the status of a page without field errors.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl IntoResponse for Page {
    fn into_response(self) -> Response {
        let status = if self.errors.is_empty() {
            self.status
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        };
        let shown_notice = self.notice.is_some();
        let mut response = (status, Json(self)).into_response();
        if shown_notice {
            // The notice has been displayed; drop the flash cookie that may have carried it.
            append_cookie(&mut response, &expired_cookie(FLASH_COOKIE));
        }
        response
    }
}

/// What a redirect does to the session cookie.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCookie {
    Keep,
    Set { token: String, secure: bool },
    Clear,
}

/// Redirect
///
/// A `303 See Other` to `to`, optionally carrying a notice for the next page and a
/// session cookie change.
#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub to: String,
    pub notice: Option<String>,
    pub session: SessionCookie,
}

impl Redirect {
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            to: location.into(),
            notice: None,
            session: SessionCookie::Keep,
        }
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }

    pub fn with_session(mut self, session: SessionCookie) -> Self {
        self.session = session;
        self
    }
}

impl IntoResponse for Redirect {
    fn into_response(self) -> Response {
        let mut response = StatusCode::SEE_OTHER.into_response();
        match HeaderValue::from_str(&self.to) {
            Ok(location) => {
                response.headers_mut().insert(header::LOCATION, location);
            }
            Err(e) => {
                tracing::error!(error = %e, to = %self.to, "unencodable redirect target");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }

        if let Some(notice) = &self.notice {
            append_cookie(
                &mut response,
                &format!(
                    "{FLASH_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
                    urlencoding::encode(notice)
                ),
            );
        }

        match &self.session {
            SessionCookie::Keep => {}
            SessionCookie::Set { token, secure } => {
                let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
                if *secure {
                    cookie.push_str("; Secure");
                }
                append_cookie(&mut response, &cookie);
            }
            SessionCookie::Clear => append_cookie(&mut response, &expired_cookie(SESSION_COOKIE)),
        }
        response
    }
}

/// Outcome
///
/// Every handler ends in one of two navigation outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Render(Page),
    Redirect(Redirect),
}

impl Outcome {
    pub fn redirect(location: impl Into<String>) -> Self {
        Outcome::Redirect(Redirect::to(location))
    }

    pub fn page(&self) -> Option<&Page> {
        match self {
            Outcome::Render(page) => Some(page),
            Outcome::Redirect(_) => None,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Outcome::Redirect(redirect) => Some(&redirect.to),
            Outcome::Render(_) => None,
        }
    }
}

impl From<Page> for Outcome {
    fn from(page: Page) -> Self {
        Outcome::Render(page)
    }
}

impl From<Redirect> for Outcome {
    fn from(redirect: Redirect) -> Self {
        Outcome::Redirect(redirect)
    }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Outcome::Render(page) => page.into_response(),
            Outcome::Redirect(redirect) => redirect.into_response(),
        }
    }
}

/// Flash
///
/// The notice left by the previous response's redirect, if any.
#[derive(Debug, Clone, Default)]
pub struct Flash(pub Option<String>);

impl<S> FromRequestParts<S> for Flash
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let notice = cookie_value(&parts.headers, FLASH_COOKIE)
            .and_then(|raw| urlencoding::decode(&raw).ok().map(|s| s.into_owned()));
        Ok(Flash(notice))
    }
}

fn expired_cookie(name: &str) -> String {
    format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn append_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}
