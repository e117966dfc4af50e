//! Authenticated HTML views.

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use sso_portal_identity::User;

use crate::auth::RequireAuth;

/// Home page.
#[derive(Template)]
#[template(path = "core/index.html")]
pub struct IndexTemplate<'a> {
    pub user: &'a User,
}

/// Profile page with the stored account fields.
#[derive(Template)]
#[template(path = "core/user_info.html")]
pub struct UserInfoTemplate<'a> {
    pub user: &'a User,
}

/// Renders a template into an HTML response.
pub(crate) fn render(template: &impl Template) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!("Template render error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

pub async fn index(RequireAuth(auth): RequireAuth) -> Response {
    render(&IndexTemplate { user: auth.user() })
}

pub async fn user_info(RequireAuth(auth): RequireAuth) -> Response {
    render(&UserInfoTemplate { user: auth.user() })
}
