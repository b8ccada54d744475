//! # Session crate
//!
//! The app can be signed in as up to five independent principals at once
//! (student, admin, moderator, club moderator, company). This crate owns those
//! sessions: it restores them at startup, applies login and logout, persists
//! credentials to the secure store and keeps the app-icon badge up to date for
//! the signed-in student.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`kind`] | [`IdentityKind`] and the secure-storage key namespace |
//! | [`identity`] | [`IdentitySession`], the generic per-kind session, and its observable slot |
//! | [`profile`] | [`IdentityProfile`] and the five kind-specific profiles |
//! | [`context`] | [`SessionContext`]: login, logout, sign-in, status updates |
//! | [`bootstrap`] | Startup restore of all five kinds |
//! | [`badge`] | Unread tally and [`BadgeAggregator`] |
//! | [`watcher`] | [`BadgeWatcher`], realtime-driven badge refresh |
//!
//! ## Lifecycle
//!
//! ```text
//! SessionContext::new ──► bootstrap() ──► login / logout / sign_in ...
//!        │                   │
//!        │                   └─ loading = true until all kinds settle
//!        └─ BadgeWatcher::start (optional, recomputes on change events)
//! ```
//!
//! There is no teardown; the context lives as long as the process.

pub mod badge;
pub mod bootstrap;
pub mod context;
mod error;
pub mod identity;
pub mod kind;
pub mod profile;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use badge::{BadgeAggregator, BadgeOwner, Recipient, UnreadTally};
pub use bootstrap::BootstrapReport;
pub use context::{SessionContext, SessionOptions};
pub use error::SessionError;
pub use identity::{Credentials, IdentitySession, IdentitySlot};
pub use kind::IdentityKind;
pub use profile::{
    AdminProfile, ClubModeratorProfile, CompanyProfile, IdentityProfile, ModeratorProfile,
    StudentProfile,
};
pub use watcher::BadgeWatcher;
