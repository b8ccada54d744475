//! Shared fixtures for the session tests.

use std::sync::Arc;
use std::time::Duration;

use api::{AuthTokens, MemoryBackend, MemoryPush};
use store::{MemoryStore, SecureStore};

use crate::kind::keys;
use crate::{IdentityKind, SessionContext, SessionOptions};

pub(crate) struct Harness {
    pub ctx: SessionContext,
    pub store: MemoryStore,
    pub backend: MemoryBackend,
    pub push: MemoryPush,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_push(MemoryPush::new())
    }

    pub fn with_push(push: MemoryPush) -> Self {
        let store = MemoryStore::new();
        let backend = MemoryBackend::new();
        let ctx = SessionContext::new(
            Arc::new(store.clone()),
            Arc::new(backend.clone()),
            Arc::new(push.clone()),
            SessionOptions {
                push_project_id: Some("test-project".to_string()),
            },
        );
        Self {
            ctx,
            store,
            backend,
            push,
        }
    }

    pub fn stored(&self, key: impl AsRef<str>) -> Option<String> {
        self.store.value(key.as_ref())
    }

    /// Leave valid credentials for `kind` in the store, as a previous run would.
    pub async fn persist_tokens(&self, kind: IdentityKind, user_id: &str) -> AuthTokens {
        let tokens = self.backend.issue_tokens(user_id);
        for (suffix, value) in [
            (keys::ACCESS_TOKEN, &tokens.access_token),
            (keys::REFRESH_TOKEN, &tokens.refresh_token),
            (keys::ACCOUNT_ID, &user_id.to_string()),
        ] {
            self.store.set(&kind.key(suffix), value).await.unwrap();
        }
        tokens
    }
}

/// Poll `check` until it holds, yielding to background tasks in between.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
