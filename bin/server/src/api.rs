//! JSON API for the current user.

use axum::Json;
use serde::Serialize;
use sso_portal_identity::User;

use crate::auth::ApiUser;

/// Body of `GET /api/me/`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct MeResponse {
    pub username: String,
    /// Empty when the account has no email.
    pub email: String,
}

impl From<&User> for MeResponse {
    fn from(user: &User) -> Self {
        Self {
            username: user.username().to_string(),
            email: user.email().unwrap_or_default().to_string(),
        }
    }
}

pub async fn me(ApiUser(auth): ApiUser) -> Json<MeResponse> {
    Json(MeResponse::from(auth.user()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_email_is_empty_string() {
        let user = User::new("alice".to_string(), None);
        let body = serde_json::to_value(MeResponse::from(&user)).expect("json");
        assert_eq!(body, serde_json::json!({ "username": "alice", "email": "" }));
    }
}
