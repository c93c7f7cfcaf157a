//! Session authentication for the HTTP API.
//!
//! Sessions are opaque random tokens issued at login. Clients present them
//! either as `Authorization: Bearer <token>` or in the `autoqa_session`
//! cookie set by the login endpoint.

pub mod middleware;

pub use middleware::{
    clear_session_cookie, optional_user, require_session, session_cookie, session_token,
    AuthenticatedUser, SESSION_COOKIE,
};
