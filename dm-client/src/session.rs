//! Verified session bound to a store handle.

use dmsync_types::{DmError, UserId};

/// The caller's identity as verified by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Session {
    user_id: Option<UserId>,
}

impl Session {
    /// A session with no verified user.
    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    /// A session verified as `user_id`.
    pub fn verified(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    /// The verified user, if any.
    pub fn current_user_id(&self) -> Option<UserId> {
        self.user_id
    }

    /// The verified user, or `Unauthenticated`.
    pub fn require_user(&self) -> Result<UserId, DmError> {
        self.user_id
            .ok_or_else(|| DmError::Unauthenticated("no verified session".into()))
    }

    /// Succeed only if the verified user is `user_id`.
    pub fn require(&self, user_id: UserId) -> Result<(), DmError> {
        if self.require_user()? == user_id {
            Ok(())
        } else {
            Err(DmError::Unauthenticated(format!(
                "session is not {}",
                user_id
            )))
        }
    }

    /// Succeed only if the verified user is one of `members`.
    pub fn require_any(&self, members: &[UserId]) -> Result<UserId, DmError> {
        let me = self.require_user()?;
        if members.contains(&me) {
            Ok(me)
        } else {
            Err(DmError::Unauthenticated(
                "session is not a member of this conversation".into(),
            ))
        }
    }
}
