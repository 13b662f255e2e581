//! Passwordless authentication
//!
//! Handles:
//! - Signed cookie sessions
//! - Email token flow
//! - Authentication middleware

mod middleware;
pub mod passwordless;
pub mod session;

pub use middleware::{CurrentUser, identify, require_auth};
pub use passwordless::{LogDelivery, TokenDelivery, TokenStore, accept_token, passwordless_router};
pub use session::{Session, SessionUpdate, decode_session, encode_session, session_layer};
