//! Handshake authentication.
//!
//! The WebSocket handshake hands its token to an [`IdentityProvider`], which
//! either yields the recipient the connection belongs to or rejects it.

mod claims;
mod jwt;

pub use claims::Claims;
pub use jwt::JwtValidator;

use crate::error::AppError;
use crate::notification::RecipientId;

/// Resolves a handshake token to the recipient it identifies
pub trait IdentityProvider: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<RecipientId, AppError>;
}
