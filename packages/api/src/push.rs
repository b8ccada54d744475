//! # Push notifications
//!
//! The app never delivers remote pushes itself; it only asks the OS for
//! permission, obtains a device push token to store on the student's profile,
//! shows local notifications and drives the app-icon badge. [`PushNotifier`] is
//! that surface. Mobile shells bridge it to the OS notification service;
//! [`MemoryPush`] records calls for tests and headless runs.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::ApiError;

/// A local notification that was scheduled for immediate display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalNotification {
    pub title: String,
    pub body: String,
    pub badge: Option<u32>,
}

#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// Ask the user for notification permission. `Ok(false)` means denied.
    async fn request_permission(&self) -> Result<bool, ApiError>;

    /// Device push token for the given push project.
    async fn push_token(&self, project_id: &str) -> Result<String, ApiError>;

    /// Show a local notification right away.
    async fn schedule_local(
        &self,
        title: &str,
        body: &str,
        badge: Option<u32>,
    ) -> Result<(), ApiError>;

    async fn set_badge_count(&self, count: u32) -> Result<(), ApiError>;

    async fn badge_count(&self) -> Result<u32, ApiError>;
}

#[derive(Debug)]
struct PushState {
    permission: bool,
    token: Option<String>,
    badge: u32,
    badge_writes: usize,
    scheduled: Vec<LocalNotification>,
}

/// In-memory PushNotifier for testing and platforms without push support.
#[derive(Clone, Debug)]
pub struct MemoryPush {
    state: Arc<Mutex<PushState>>,
}

impl Default for MemoryPush {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(PushState {
                permission: true,
                token: Some("memory-push-token".to_string()),
                badge: 0,
                badge_writes: 0,
                scheduled: Vec::new(),
            })),
        }
    }
}

impl MemoryPush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(self, granted: bool) -> Self {
        self.update(|s| s.permission = granted);
        self
    }

    /// `None` makes `push_token` fail.
    pub fn with_token(self, token: Option<&str>) -> Self {
        self.update(|s| s.token = token.map(str::to_string));
        self
    }

    pub fn badge(&self) -> u32 {
        self.read(|s| s.badge)
    }

    /// How many times the badge was written.
    pub fn badge_writes(&self) -> usize {
        self.read(|s| s.badge_writes)
    }

    pub fn scheduled(&self) -> Vec<LocalNotification> {
        self.read(|s| s.scheduled.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&PushState) -> T) -> T {
        match self.state.lock() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut PushState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl PushNotifier for MemoryPush {
    async fn request_permission(&self) -> Result<bool, ApiError> {
        Ok(self.read(|s| s.permission))
    }

    async fn push_token(&self, project_id: &str) -> Result<String, ApiError> {
        self.read(|s| s.token.clone())
            .ok_or_else(|| ApiError::Push(format!("no push token for project {project_id}")))
    }

    async fn schedule_local(
        &self,
        title: &str,
        body: &str,
        badge: Option<u32>,
    ) -> Result<(), ApiError> {
        self.update(|s| {
            s.scheduled.push(LocalNotification {
                title: title.to_string(),
                body: body.to_string(),
                badge,
            });
        });
        Ok(())
    }

    async fn set_badge_count(&self, count: u32) -> Result<(), ApiError> {
        self.update(|s| {
            s.badge = count;
            s.badge_writes += 1;
        });
        Ok(())
    }

    async fn badge_count(&self) -> Result<u32, ApiError> {
        Ok(self.badge())
    }
}
