//! Suggestion store: creation and the human approval workflow.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use takeoff_core::{
    lifecycle, new_v7, ClassificationSuggestion, Error, EventBus, NewSuggestion, Result,
    ReviewCommand, SuggestionRepository, Transition,
};

/// Re-reads after a lost compare-and-set before giving up.
const MAX_REVIEW_ATTEMPTS: usize = 3;

/// Persists suggestions and applies review decisions.
///
/// Reviews are compare-and-set on the pending row: when two reviewers race,
/// the loser re-reads and re-evaluates, so an identical decision is a no-op
/// and a conflicting one fails with [`Error::InvalidStateTransition`].
#[derive(Clone)]
pub struct SuggestionStore {
    repo: Arc<dyn SuggestionRepository>,
    events: EventBus,
}

impl SuggestionStore {
    pub fn new(repo: Arc<dyn SuggestionRepository>, events: EventBus) -> Self {
        Self { repo, events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create a pending suggestion.
    #[instrument(skip_all, fields(subsystem = "classify", component = "suggestion_store", op = "create"))]
    pub async fn create(&self, new: NewSuggestion) -> Result<ClassificationSuggestion> {
        let has_code = new.suggested_commodity_code.is_some()
            || new.suggested_pricing_code.is_some()
            || !new.derived_items.is_empty();
        if !has_code {
            return Err(Error::InvalidInput(
                "suggestion needs a commodity code, a pricing code or a derived item".to_string(),
            ));
        }

        let (suggestion, events) = lifecycle::create(new_v7(), new, Utc::now());
        self.repo.insert(&suggestion).await?;
        self.events.emit_all(events);

        info!(
            suggestion_id = %suggestion.id,
            fingerprint = suggestion.pattern_fingerprint.as_deref().unwrap_or("-"),
            "Suggestion created"
        );
        Ok(suggestion)
    }

    pub async fn approve(&self, id: Uuid, approved_by: &str) -> Result<ClassificationSuggestion> {
        self.review(
            id,
            ReviewCommand::Approve {
                by: approved_by.to_string(),
            },
        )
        .await
    }

    pub async fn reject(
        &self,
        id: Uuid,
        rejected_by: &str,
        reason: &str,
    ) -> Result<ClassificationSuggestion> {
        self.review(
            id,
            ReviewCommand::Reject {
                by: rejected_by.to_string(),
                reason: reason.to_string(),
            },
        )
        .await
    }

    #[instrument(skip(self, command), fields(subsystem = "classify", component = "suggestion_store", op = "review", suggestion_id = %id))]
    async fn review(&self, id: Uuid, command: ReviewCommand) -> Result<ClassificationSuggestion> {
        for attempt in 1..=MAX_REVIEW_ATTEMPTS {
            let current = self.get(id).await?;
            match lifecycle::transition(&current, &command, Utc::now())? {
                Transition::Unchanged => {
                    debug!(status = %current.status, "Review repeated, no change");
                    return Ok(current);
                }
                Transition::Applied {
                    suggestion,
                    review,
                    events,
                } => {
                    if self.repo.record_review(id, &review).await? {
                        self.events.emit_all(events);
                        info!(
                            status = %suggestion.status,
                            reviewer = %review.reviewed_by,
                            "Suggestion reviewed"
                        );
                        return Ok(suggestion);
                    }
                    debug!(attempt, "Review lost a race, re-reading");
                }
            }
        }
        Err(Error::Internal(format!(
            "review of suggestion {id} did not settle after {MAX_REVIEW_ATTEMPTS} attempts"
        )))
    }

    pub async fn get(&self, id: Uuid) -> Result<ClassificationSuggestion> {
        self.repo
            .get(id)
            .await?
            .ok_or(Error::SuggestionNotFound(id))
    }

    /// The pending suggestion for a fingerprint, if any.
    pub async fn pending_for(&self, fingerprint: &str) -> Result<Option<ClassificationSuggestion>> {
        self.repo.find_pending(fingerprint).await
    }

    /// Every suggestion ever created for a fingerprint, oldest first.
    pub async fn history(&self, fingerprint: &str) -> Result<Vec<ClassificationSuggestion>> {
        self.repo.list_for_fingerprint(fingerprint).await
    }
}
