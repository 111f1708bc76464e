//! Authorization rules.
//!
//! Post creation, editing and deletion require the admin role; commenting requires any
//! logged-in account. Gate failures are reported as distinct errors: `Forbidden` for a
//! principal without the right, `LoginRequired` for no principal at all.

use crate::{
    auth::Principal,
    error::AppError,
    models::{Role, User},
};

/// True iff the principal is a logged-in account holding the admin role.
pub fn is_admin(principal: &Principal) -> bool {
    principal.user().is_some_and(User::is_admin)
}

/// Gate for post mutation routes.
pub fn require_admin(principal: &Principal) -> Result<&User, AppError> {
    match principal.user() {
        Some(user) if user.is_admin() => Ok(user),
        Some(user) => {
            tracing::warn!(user_id = user.id, "non-admin attempted a post mutation");
            Err(AppError::Forbidden)
        }
        None => {
            tracing::warn!("anonymous visitor attempted a post mutation");
            Err(AppError::Forbidden)
        }
    }
}

/// Gate for comment creation.
pub fn require_user(principal: &Principal) -> Result<&User, AppError> {
    principal.user().ok_or(AppError::LoginRequired)
}

/// Role granted to a new account: the very first registrant administers the blog.
pub fn role_for_new_account(existing_accounts: usize) -> Role {
    if existing_accounts == 0 { Role::Admin } else { Role::Member }
}
