//! # API crate: the client contract with the hosted backend
//!
//! Everything the app knows about its backend-as-a-service lives here: the
//! operations it calls, the rows it reads, and the platform push-notification
//! interface. The session crate only ever talks to the backend through the
//! [`Backend`] trait, so tests swap in [`MemoryBackend`] and production builds use
//! [`RestBackend`].
//!
//! ## Modules
//!
//! | Module | Feature gate | Purpose |
//! |--------|-------------|---------|
//! | [`backend`] |  | The [`Backend`] trait, the [`Query`] filter model, auth payloads and change-feed types |
//! | [`models`] |  | Row types for the relations the app reads (`students`, `notifications`, ...) |
//! | [`push`] |  | [`PushNotifier`] platform interface and the in-memory [`MemoryPush`] |
//! | [`memory`] |  | [`MemoryBackend`], an in-process backend used by tests and offline runs |
//! | [`rest`] | `remote` | [`RestBackend`], HTTP client for the auth, data and storage endpoints |
//! | [`realtime`] | `remote` | Websocket change-feed client used by [`RestBackend::subscribe`](Backend::subscribe) |
//!
//! ## Errors
//!
//! Every fallible call returns [`ApiError`]. Callers in the session layer decide
//! whether an error is load-bearing (a failed refresh forces logout) or merely
//! degrades a feature (a failed push-token write is logged and dropped).

pub mod backend;
pub mod config;
mod error;
pub mod memory;
pub mod models;
pub mod push;
#[cfg(feature = "remote")]
pub mod realtime;
#[cfg(feature = "remote")]
pub mod rest;

pub use backend::{
    AuthSession, AuthTokens, AuthUser, Backend, ChangeEvent, ChangeKind, Filter, Query, Row,
    Subscription,
};
pub use config::BaasConfig;
pub use error::ApiError;
pub use memory::MemoryBackend;
pub use push::{MemoryPush, PushNotifier};
#[cfg(feature = "remote")]
pub use rest::RestBackend;
