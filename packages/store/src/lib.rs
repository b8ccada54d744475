//! # Secure key-value storage for persisted credentials
//!
//! The session layer keeps exactly one kind of durable state on the device: the
//! credential record of every signed-in identity (tokens, account id and a few
//! profile fields). This crate hides the platform secure-storage primitive behind
//! the [`SecureStore`] trait so the same session code runs against:
//!
//! | Store | Backing | Used by |
//! |-------|---------|---------|
//! | [`MemoryStore`] | `HashMap` behind a mutex | tests, headless runs |
//! | [`FileStore`] | one file per key under the app data directory | desktop / mobile builds |
//!
//! Keys are plain strings. The store makes no promise of atomicity across keys;
//! callers that write several keys for one record accept that a crash may leave
//! the record half written.

mod secure;
pub use secure::{SecureStore, StoreError};

mod memory;
pub use memory::MemoryStore;

mod file_store;
pub use file_store::FileStore;
