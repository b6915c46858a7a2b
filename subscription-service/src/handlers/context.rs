//! Caller identity supplied by the upstream auth layer.
//!
//! The gateway in front of this service authenticates the caller and
//! forwards `X-User-ID` and `X-User-Role`. They are trusted as-is.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
    /// Internal callers such as the renewal cron.
    System,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthContext {
    pub fn is_operator(&self) -> bool {
        matches!(self.role, Role::Admin | Role::System)
    }

    /// Users act on their own resources; operators act on anyone's.
    pub fn ensure_owner(&self, owner: Uuid) -> Result<(), AppError> {
        if self.is_operator() || self.user_id == owner {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "not allowed to act on another user's subscription"
            )))
        }
    }

    pub fn ensure_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!("admin role required")))
        }
    }

    pub fn ensure_operator(&self) -> Result<(), AppError> {
        if self.is_operator() {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "admin or system role required"
            )))
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("missing or invalid X-User-ID")))?;

        let role = match parts.headers.get(USER_ROLE_HEADER) {
            None => Role::User,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(Role::parse)
                .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("invalid X-User-Role")))?,
        };

        Ok(AuthContext { user_id, role })
    }
}
