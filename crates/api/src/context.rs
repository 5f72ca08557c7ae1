use fieldstock_core::UserId;

/// Acting user for a request.
///
/// Set by the upstream authentication layer through the `X-User-Id` header
/// and required on every ledger route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    user_id: UserId,
}

impl ActorContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
