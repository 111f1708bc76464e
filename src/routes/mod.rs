//! Router Module Index
//!
//! Routes are split by who may reach them. Access control is applied per module: the
//! authenticated router carries a login layer, and every admin handler runs the admin
//! policy gate before touching the store.

/// Routes open to every visitor, anonymous or logged in.
pub mod public;

/// Routes behind the `login_required` layer.
pub mod authenticated;

/// Post management routes; each handler checks the admin role itself.
pub mod admin;
