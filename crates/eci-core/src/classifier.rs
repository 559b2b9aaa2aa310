//! Error Classifier for destructive calls
//!
//! Turns the raw result of a delete into either "the goal already holds" or
//! a fatal error. There are exactly three escape hatches:
//!
//! 1. the call succeeded
//! 2. the control plane said 404
//! 3. the control plane said 409 `unexpected_status` and its detail entry for
//!    this resource type already reports the terminal status
//!
//! Everything else, including every transport failure, is fatal.

use crate::error::{RemoteError, RemoteResult};

/// Machine-readable code the control plane uses for state conflicts
pub const UNEXPECTED_STATUS: &str = "unexpected_status";

/// Why a delete counts as done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Satisfied {
    /// The delete call itself succeeded
    Deleted,
    /// The resource was already gone (404)
    NotFound,
    /// The control plane reported the resource in its terminal status (409)
    AlreadyDeleted,
}

impl Satisfied {
    pub fn message(&self) -> &'static str {
        match self {
            Satisfied::Deleted => "successfully deleted",
            Satisfied::NotFound => "resource does not exist",
            Satisfied::AlreadyDeleted => "resource is already deleted",
        }
    }

    /// True when the outcome already proves the terminal state was reached
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, Satisfied::Deleted)
    }
}

/// Result of classifying one terminal remote response
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedOutcome {
    Satisfied(Satisfied),
    Fatal(RemoteError),
}

impl ClassifiedOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, ClassifiedOutcome::Satisfied(_))
    }

    /// Collapse into a success message or the unchanged error
    pub fn into_result(self) -> Result<&'static str, RemoteError> {
        match self {
            ClassifiedOutcome::Satisfied(reason) => Ok(reason.message()),
            ClassifiedOutcome::Fatal(err) => Err(err),
        }
    }
}

/// Classify the result of a delete call
pub fn classify_delete_outcome<T>(
    result: RemoteResult<T>,
    resource_key: &str,
    deleted_status: &str,
) -> ClassifiedOutcome {
    let err = match result {
        Ok(_) => return ClassifiedOutcome::Satisfied(Satisfied::Deleted),
        Err(err) => err,
    };

    let RemoteError::Api(api) = &err else {
        return ClassifiedOutcome::Fatal(err);
    };

    if api.is_not_found() {
        return ClassifiedOutcome::Satisfied(Satisfied::NotFound);
    }

    if api.is_conflict()
        && api.is_code(UNEXPECTED_STATUS)
        && api.detail_status(resource_key) == Some(deleted_status)
    {
        return ClassifiedOutcome::Satisfied(Satisfied::AlreadyDeleted);
    }

    ClassifiedOutcome::Fatal(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use serde_json::{Value, json};

    fn conflict(key: &str, status: &str) -> RemoteError {
        let detail = json!({ key: { "status": status } });
        let Value::Object(detail) = detail else {
            unreachable!()
        };
        ApiError::new(409)
            .with_code(UNEXPECTED_STATUS)
            .with_message("unexpected status")
            .with_detail(detail)
            .into()
    }

    #[test]
    fn success_is_successfully_deleted() {
        let outcome = classify_delete_outcome(Ok(()), "resource_subnet", "deleted");
        assert_eq!(outcome.into_result(), Ok("successfully deleted"));
    }

    #[test]
    fn not_found_is_satisfied() {
        let outcome = classify_delete_outcome::<()>(
            Err(ApiError::new(404).into()),
            "resource_subnet",
            "deleted",
        );
        assert_eq!(outcome, ClassifiedOutcome::Satisfied(Satisfied::NotFound));
        assert_eq!(outcome.into_result(), Ok("resource does not exist"));
    }

    #[test]
    fn matching_conflict_is_already_deleted() {
        let outcome = classify_delete_outcome::<()>(
            Err(conflict("resource_allocation", "terminated")),
            "resource_allocation",
            "terminated",
        );
        assert_eq!(outcome.into_result(), Ok("resource is already deleted"));
    }

    #[test]
    fn conflict_with_other_status_is_propagated_unchanged() {
        let original = conflict("resource_block_storage", "deleting");
        let outcome = classify_delete_outcome::<()>(
            Err(original.clone()),
            "resource_block_storage",
            "deleted",
        );
        assert_eq!(outcome, ClassifiedOutcome::Fatal(original));
    }

    #[test]
    fn conflict_for_other_resource_key_is_propagated() {
        let original = conflict("resource_virtual_machine", "deleted");
        let outcome = classify_delete_outcome::<()>(
            Err(original.clone()),
            "resource_block_storage",
            "deleted",
        );
        assert_eq!(outcome, ClassifiedOutcome::Fatal(original));
    }

    #[test]
    fn conflict_with_other_code_is_propagated() {
        let mut api = match conflict("resource_subnet", "deleted") {
            RemoteError::Api(api) => api,
            RemoteError::Transport(_) => unreachable!(),
        };
        api.code = Some("resource_attached".to_string());
        let outcome = classify_delete_outcome::<()>(
            Err(api.clone().into()),
            "resource_subnet",
            "deleted",
        );
        assert_eq!(outcome, ClassifiedOutcome::Fatal(api.into()));
    }

    #[test]
    fn transport_errors_are_always_fatal() {
        let err = RemoteError::transport("failed to parse error message");
        let outcome = classify_delete_outcome::<()>(Err(err.clone()), "resource_subnet", "deleted");
        assert_eq!(outcome, ClassifiedOutcome::Fatal(err));
    }

    #[test]
    fn only_idempotent_outcomes_count_as_confirmed() {
        assert!(!Satisfied::Deleted.is_confirmed());
        assert!(Satisfied::NotFound.is_confirmed());
        assert!(Satisfied::AlreadyDeleted.is_confirmed());
    }
}
