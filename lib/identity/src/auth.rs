//! Request-level authentication context.

use sso_portal_core::UserId;

use crate::session::{Session, SessionId};
use crate::user::User;

/// The user behind a request, resolved from a live session.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    session: Session,
    user: User,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn new(session: Session, user: User) -> Self {
        Self { session, user }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user.id()
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Returns true if the user may open the admin panel.
    #[must_use]
    pub fn is_staff(&self) -> bool {
        self.user.is_staff()
    }
}

/// Outcome of resolving a session cookie.
#[derive(Debug)]
pub enum SessionLookup {
    /// The session is live and its user exists.
    Authenticated(Box<AuthenticatedUser>),
    /// No session cookie, or the cookie names an unknown session.
    Anonymous,
    /// The session existed but has expired.
    Expired { session_id: SessionId },
}

impl SessionLookup {
    /// Returns the authenticated user, if any.
    #[must_use]
    pub fn into_user(self) -> Option<AuthenticatedUser> {
        match self {
            Self::Authenticated(user) => Some(*user),
            Self::Anonymous | Self::Expired { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn exposes_user_and_session() {
        let mut user = User::new("alice".to_string(), None);
        user.set_staff(true);
        let session = Session::new(SessionId::generate(), user.id(), Duration::hours(1));

        let auth = AuthenticatedUser::new(session.clone(), user.clone());

        assert_eq!(auth.user_id(), user.id());
        assert_eq!(auth.session(), &session);
        assert!(auth.is_staff());
    }

    #[test]
    fn only_authenticated_lookups_yield_a_user() {
        assert!(SessionLookup::Anonymous.into_user().is_none());
        assert!(
            SessionLookup::Expired {
                session_id: SessionId::generate()
            }
            .into_user()
            .is_none()
        );
    }
}
