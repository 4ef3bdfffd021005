//! Suggestion approval state machine.
//!
//! Transitions are pure: each function returns the new suggestion state and
//! the events it produced. Persisting the state and dispatching the events
//! is the caller's job.
//!
//! ```text
//! Pending ──approve──▶ Approved
//!    └─────reject────▶ Rejected
//! ```
//!
//! Repeating the recorded outcome with the recorded actor is a no-op. Every
//! other command against a terminal suggestion is an
//! [`Error::InvalidStateTransition`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::SuggestionEvent;
use crate::models::{ClassificationSuggestion, NewSuggestion, ReviewRecord, SuggestionStatus};

/// Human review decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewCommand {
    Approve { by: String },
    Reject { by: String, reason: String },
}

impl ReviewCommand {
    /// Status the command moves a pending suggestion to.
    pub fn target(&self) -> SuggestionStatus {
        match self {
            Self::Approve { .. } => SuggestionStatus::Approved,
            Self::Reject { .. } => SuggestionStatus::Rejected,
        }
    }

    pub fn actor(&self) -> &str {
        match self {
            Self::Approve { by } | Self::Reject { by, .. } => by,
        }
    }

    fn note(&self) -> Option<String> {
        match self {
            Self::Approve { .. } => None,
            Self::Reject { reason, .. } => Some(reason.clone()),
        }
    }
}

/// Outcome of applying a review command.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// State changed; persist `suggestion` and dispatch `events`.
    Applied {
        suggestion: ClassificationSuggestion,
        review: ReviewRecord,
        events: Vec<SuggestionEvent>,
    },
    /// Idempotent repeat of the recorded outcome.
    Unchanged,
}

/// Build a new pending suggestion and its creation event.
pub fn create(
    id: Uuid,
    new: NewSuggestion,
    now: DateTime<Utc>,
) -> (ClassificationSuggestion, Vec<SuggestionEvent>) {
    let suggestion = ClassificationSuggestion {
        id,
        pattern_fingerprint: new.pattern_fingerprint,
        suggested_commodity_code: new.suggested_commodity_code,
        suggested_pricing_code: new.suggested_pricing_code,
        derived_items: new.derived_items,
        reasoning_summary: new.reasoning_summary,
        status: SuggestionStatus::Pending,
        created_at: now,
        reviewed_at: None,
        reviewed_by: None,
        review_note: None,
    };
    let events = vec![SuggestionEvent::SuggestionCreated {
        suggestion_id: suggestion.id,
        fingerprint: suggestion.pattern_fingerprint.clone(),
        status: suggestion.status,
    }];
    (suggestion, events)
}

/// Apply a review command to the current state of a suggestion.
pub fn transition(
    current: &ClassificationSuggestion,
    command: &ReviewCommand,
    now: DateTime<Utc>,
) -> Result<Transition> {
    let actor = command.actor().trim();
    if actor.is_empty() {
        return Err(Error::InvalidInput("reviewer must not be empty".to_string()));
    }

    let target = command.target();

    if current.status.is_terminal() {
        let same_outcome = current.status == target;
        let same_actor = current.reviewed_by.as_deref() == Some(actor);
        if same_outcome && same_actor {
            return Ok(Transition::Unchanged);
        }
        return Err(Error::InvalidStateTransition {
            from: current.status,
            to: target,
        });
    }

    let review = ReviewRecord {
        status: target,
        reviewed_by: actor.to_string(),
        reviewed_at: now,
        note: command.note(),
    };

    let mut suggestion = current.clone();
    suggestion.status = target;
    suggestion.reviewed_by = Some(review.reviewed_by.clone());
    suggestion.reviewed_at = Some(now);
    suggestion.review_note = review.note.clone();

    let event = match command {
        ReviewCommand::Approve { .. } => SuggestionEvent::SuggestionApproved {
            suggestion_id: suggestion.id,
            fingerprint: suggestion.pattern_fingerprint.clone(),
            status: target,
            reviewed_by: review.reviewed_by.clone(),
        },
        ReviewCommand::Reject { reason, .. } => SuggestionEvent::SuggestionRejected {
            suggestion_id: suggestion.id,
            fingerprint: suggestion.pattern_fingerprint.clone(),
            status: target,
            reviewed_by: review.reviewed_by.clone(),
            reason: reason.clone(),
        },
    };

    Ok(Transition::Applied {
        suggestion,
        review,
        events: vec![event],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> ClassificationSuggestion {
        let (suggestion, _) = create(
            Uuid::now_v7(),
            NewSuggestion {
                pattern_fingerprint: Some("fp-1".to_string()),
                suggested_commodity_code: Some("23-31 13 11".to_string()),
                suggested_pricing_code: None,
                derived_items: vec![],
                reasoning_summary: "galvanized indoor duct".to_string(),
            },
            Utc::now(),
        );
        suggestion
    }

    fn approve(by: &str) -> ReviewCommand {
        ReviewCommand::Approve { by: by.to_string() }
    }

    fn reject(by: &str) -> ReviewCommand {
        ReviewCommand::Reject {
            by: by.to_string(),
            reason: "x".to_string(),
        }
    }

    fn apply(current: &ClassificationSuggestion, cmd: &ReviewCommand) -> ClassificationSuggestion {
        match transition(current, cmd, Utc::now()).unwrap() {
            Transition::Applied { suggestion, .. } => suggestion,
            Transition::Unchanged => panic!("expected state change"),
        }
    }

    #[test]
    fn test_create_emits_pending_event() {
        let (suggestion, events) = create(
            Uuid::nil(),
            NewSuggestion {
                pattern_fingerprint: None,
                suggested_commodity_code: None,
                suggested_pricing_code: Some("P-1".to_string()),
                derived_items: vec![],
                reasoning_summary: "legacy element".to_string(),
            },
            Utc::now(),
        );
        assert_eq!(suggestion.status, SuggestionStatus::Pending);
        assert!(suggestion.reviewed_at.is_none());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status(), SuggestionStatus::Pending);
    }

    #[test]
    fn test_approve_pending() {
        let current = pending();
        let result = transition(&current, &approve("alice"), Utc::now()).unwrap();
        match result {
            Transition::Applied {
                suggestion, events, ..
            } => {
                assert_eq!(suggestion.status, SuggestionStatus::Approved);
                assert_eq!(suggestion.reviewed_by.as_deref(), Some("alice"));
                assert!(suggestion.reviewed_at.is_some());
                assert_eq!(
                    suggestion.suggested_commodity_code,
                    current.suggested_commodity_code
                );
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].namespaced_event_type(), "suggestion.approved");
            }
            Transition::Unchanged => panic!("expected Applied"),
        }
    }

    #[test]
    fn test_reject_records_reason() {
        let rejected = apply(&pending(), &reject("bob"));
        assert_eq!(rejected.status, SuggestionStatus::Rejected);
        assert_eq!(rejected.review_note.as_deref(), Some("x"));
    }

    #[test]
    fn test_repeat_approve_same_actor_is_noop() {
        let approved = apply(&pending(), &approve("alice"));
        let again = transition(&approved, &approve("alice"), Utc::now()).unwrap();
        assert_eq!(again, Transition::Unchanged);
    }

    #[test]
    fn test_reject_after_approve_fails() {
        let approved = apply(&pending(), &approve("alice"));
        let err = transition(&approved, &reject("bob"), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidStateTransition {
                from: SuggestionStatus::Approved,
                to: SuggestionStatus::Rejected
            }
        ));
    }

    #[test]
    fn test_same_outcome_different_actor_fails() {
        let approved = apply(&pending(), &approve("alice"));
        let err = transition(&approved, &approve("carol"), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_repeat_reject_ignores_reason() {
        let rejected = apply(&pending(), &reject("bob"));
        let again = ReviewCommand::Reject {
            by: "bob".to_string(),
            reason: "different wording".to_string(),
        };
        assert_eq!(
            transition(&rejected, &again, Utc::now()).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_blank_reviewer_rejected() {
        let err = transition(&pending(), &approve("  "), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
