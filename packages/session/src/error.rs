use api::ApiError;

use crate::IdentityKind;

/// Errors surfaced by user-initiated session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{0} account is suspended")]
    Suspended(IdentityKind),

    #[error("no {0} profile for this account")]
    MissingProfile(IdentityKind),

    #[error("access token does not belong to a known account")]
    UnknownAccount,
}
