//! Read-only admin panel listing the user directory.

use askama::Template;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sso_portal_identity::User;
use std::sync::Arc;

use crate::auth::{AppState, RequireStaff};
use crate::views::render;

#[derive(Template)]
#[template(path = "admin/users.html")]
pub struct UsersTemplate<'a> {
    pub user: &'a User,
    pub users: Vec<User>,
}

pub async fn users(
    State(state): State<Arc<AppState>>,
    RequireStaff(auth): RequireStaff,
) -> Response {
    match state.users.list().await {
        Ok(users) => render(&UsersTemplate {
            user: auth.user(),
            users,
        }),
        Err(e) => {
            tracing::error!(error = %e, "failed to list users");
            let body = if state.debug {
                format!("Internal server error: {e}")
            } else {
                "Internal server error".to_string()
            };
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}
