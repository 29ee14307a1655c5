//! Authentication port.
//!
//! Identity, the contact graph, and friend-request workflows live in an
//! external service; the orchestrator only needs a token → user mapping at
//! admission time.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::ids::UserId;

/// Resolves an opaque bearer token to a known user id.
#[async_trait]
pub trait CallAuthorizer: Send + Sync {
    /// `None` means the token does not authenticate.
    async fn authenticate(&self, token: &str) -> Option<UserId>;
}

/// Token-table authorizer for the server binary and tests.
///
/// Call setup registers one token per invited participant; production
/// deployments substitute their identity service behind [`CallAuthorizer`].
#[derive(Debug, Default)]
pub struct StaticTokenAuthorizer {
    tokens: RwLock<HashMap<String, UserId>>,
}

impl StaticTokenAuthorizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, token: impl Into<String>, user: UserId) {
        self.tokens.write().await.insert(token.into(), user);
    }

    pub async fn revoke(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }
}

#[async_trait]
impl CallAuthorizer for StaticTokenAuthorizer {
    async fn authenticate(&self, token: &str) -> Option<UserId> {
        self.tokens.read().await.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_token_authenticates() {
        tokio_test::block_on(async {
            let auth = StaticTokenAuthorizer::new();
            auth.register("tok-1", UserId::new("alice")).await;

            assert_eq!(auth.authenticate("tok-1").await, Some(UserId::new("alice")));
            assert_eq!(auth.authenticate("tok-2").await, None);

            auth.revoke("tok-1").await;
            assert_eq!(auth.authenticate("tok-1").await, None);
        });
    }
}
