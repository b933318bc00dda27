//! Precondition evaluation (spec §4.D, §4.H): a single read of the current
//! document, never re-read under race (spec §9 Open Question (a)).

use crate::document::Document;
use crate::errors::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Precondition {
    pub exists: Option<bool>,
    pub update_time: Option<PreconditionTimestamp>,
}

/// Wraps a `DateTime<Utc>` so [`Precondition`] can derive `Eq` (floats aside,
/// `DateTime` itself is already `Eq`; this newtype just documents the field's
/// role at the call site).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreconditionTimestamp(pub DateTime<Utc>);

impl Precondition {
    pub fn none() -> Self {
        Precondition::default()
    }

    pub fn exists(expected: bool) -> Self {
        Precondition {
            exists: Some(expected),
            update_time: None,
        }
    }

    pub fn update_time(expected: DateTime<Utc>) -> Self {
        Precondition {
            exists: None,
            update_time: Some(PreconditionTimestamp(expected)),
        }
    }

    /// Checks this precondition against the document read at the start of
    /// the write. `current` is `None` when no document exists at the path.
    pub fn check(&self, current: Option<&Document>) -> RepositoryResult<()> {
        if let Some(expected_exists) = self.exists {
            if current.is_some() != expected_exists {
                return Err(RepositoryError::failed_precondition(format!(
                    "Precondition exists={expected_exists} not met"
                )));
            }
        }
        if let Some(PreconditionTimestamp(expected)) = self.update_time {
            match current {
                Some(doc) if doc.update_time == expected => {}
                _ => {
                    return Err(RepositoryError::failed_precondition(
                        "Precondition updateTime mismatch".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
