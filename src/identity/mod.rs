//! Write-once account identity metadata
//!
//! An institution-issued identity (card number, account number) is bound to
//! an internal account the first time a source reports one. Later imports
//! compare against it and never overwrite it.

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Identity metadata of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccountIdentity {
    /// No source has reported an identity yet
    #[default]
    Unset,
    /// Bound identity; immutable from here on
    Set(String),
}

/// Outcome of checking a source's identity against the stored one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    /// Source carried no identity; nothing to compare
    NotReported,
    /// Source identity equals the stored one
    Matched,
    /// Account was unset; this identity must be written with the run
    Bind(String),
}

impl IdentityCheck {
    /// Identity the commit has to persist, if any
    pub fn pending_write(&self) -> Option<&str> {
        match self {
            IdentityCheck::Bind(identity) => Some(identity),
            _ => None,
        }
    }
}

impl AccountIdentity {
    /// Compare a reported identity with this state
    ///
    /// `Unset` accepts any identity and asks for it to be bound; `Set`
    /// requires an exact match after trimming whitespace.
    pub fn verify(&self, account_id: &str, reported: Option<&str>) -> PipelineResult<IdentityCheck> {
        let reported = match reported.map(str::trim).filter(|s| !s.is_empty()) {
            Some(reported) => reported,
            None => return Ok(IdentityCheck::NotReported),
        };

        match self {
            AccountIdentity::Unset => Ok(IdentityCheck::Bind(reported.to_string())),
            AccountIdentity::Set(stored) if stored == reported => Ok(IdentityCheck::Matched),
            AccountIdentity::Set(stored) => Err(ImportError::IdentityMismatch {
                account_id: account_id.to_string(),
                stored: stored.clone(),
                received: reported.to_string(),
            }),
        }
    }

    /// State after a successful bind; `Set` stays as it is
    pub fn bind(self, identity: &str) -> Self {
        match self {
            AccountIdentity::Unset => AccountIdentity::Set(identity.to_string()),
            set => set,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, AccountIdentity::Set(_))
    }
}
