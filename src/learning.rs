//! Knowledge learning queue: triage and promotion of assistant-inferred
//! facts into durable, tenant-aware knowledge.
//!
//! Candidates arrive from the inference collaborator's completion path,
//! get their conflict flags computed once at submission, and then wait for
//! an explicit reviewer decision. The queue never auto-resolves a conflict
//! and never deletes an item; rejected and merged records stay for audit.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{GovernanceError, Result};
use crate::traits::{KnowledgeStore, LearningStore};
use crate::types::{
    CustomerId, KnowledgeEntry, KnowledgeScope, LearningCandidate, LearningItem, LearningStatus,
    QueueTallies, StatusFilter,
};

/// Jaro-Winkler score above which an existing term is surfaced as similar.
const SIMILARITY_THRESHOLD: f64 = 0.85;
/// Cap on surfaced similar terms per item.
const MAX_SIMILAR_TERMS: usize = 5;
/// Rejections of the same term before the recurring-rejection signal fires.
const RECURRING_REJECTION_THRESHOLD: u64 = 3;

/// Reviewer-facing triage service over the learning queue.
pub struct LearningQueue {
    store: Arc<dyn LearningStore>,
    knowledge: Arc<dyn KnowledgeStore>,
}

impl LearningQueue {
    pub fn new(store: Arc<dyn LearningStore>, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        Self { store, knowledge }
    }

    /// Accept a candidate from the inference collaborator. Conflict flags
    /// and similar terms are computed here, once; they are snapshots of the
    /// knowledge base at submission time and never updated retroactively.
    pub async fn submit(&self, candidate: LearningCandidate) -> Result<LearningItem> {
        let term = candidate.term.trim().to_string();

        let conflicts_with_global = self
            .knowledge
            .lookup_scoped(&term, KnowledgeScope::Global)
            .await?
            .is_some();

        let conflicts_with_customer = match candidate.customer_id {
            Some(customer_id) => self
                .knowledge
                .lookup_scoped(&term, KnowledgeScope::Customer(customer_id))
                .await?
                .is_some(),
            None => false,
        };

        let existing = self.knowledge.all_terms().await?;
        let similar_existing_terms = similar_terms(&existing, &term);

        let item = LearningItem {
            id: uuid::Uuid::new_v4().to_string(),
            term,
            original_query: candidate.original_query,
            user_explanation: candidate.user_explanation,
            ai_interpretation: candidate.ai_interpretation,
            suggested_scope: candidate.suggested_scope,
            suggested_category: candidate.suggested_category,
            confidence_score: candidate.confidence_score.clamp(0.0, 1.0),
            customer_id: candidate.customer_id,
            conflicts_with_global,
            conflicts_with_customer,
            similar_existing_terms,
            status: LearningStatus::Pending,
            reviewed_by: None,
            rejection_reason: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        self.store.insert(&item).await?;
        info!(
            item_id = %item.id,
            term = %item.term,
            conflicts_with_global = item.conflicts_with_global,
            conflicts_with_customer = item.conflicts_with_customer,
            "Learning candidate queued for review"
        );
        Ok(item)
    }

    /// Approve a pending item as a global definition. Conflicting
    /// customer-scope entries are left untouched; collapsing them is the
    /// separate, explicit `promote_to_global` operation.
    pub async fn approve_as_global(
        &self,
        item_id: &str,
        definition: &str,
        reviewer: &str,
    ) -> Result<KnowledgeEntry> {
        let item = self.require_pending(item_id).await?;

        let entry = KnowledgeEntry::new(
            item.term.clone(),
            definition,
            item.suggested_category.clone(),
            KnowledgeScope::Global,
            reviewer,
        );
        self.resolve(&item, LearningStatus::ApprovedGlobal, reviewer, None, &entry)
            .await?;

        info!(
            item_id = %item.id,
            term = %item.term,
            reviewer = %reviewer,
            "Learning item approved as global"
        );
        Ok(entry)
    }

    /// Approve a pending item scoped to one customer. `customer_id = None`
    /// uses the item's originating customer; passing a different customer is
    /// an explicit reviewer override and is honored but logged.
    pub async fn approve_as_customer(
        &self,
        item_id: &str,
        customer_id: Option<CustomerId>,
        definition: &str,
        reviewer: &str,
    ) -> Result<KnowledgeEntry> {
        let item = self.require_pending(item_id).await?;

        let target = match (customer_id, item.customer_id) {
            (Some(explicit), Some(origin)) => {
                if explicit != origin {
                    warn!(
                        item_id = %item.id,
                        origin_customer = origin,
                        target_customer = explicit,
                        reviewer = %reviewer,
                        "Reviewer overrode the item's originating customer scope"
                    );
                }
                explicit
            }
            (Some(explicit), None) => explicit,
            (None, Some(origin)) => origin,
            (None, None) => {
                return Err(GovernanceError::NoCustomerScope {
                    item_id: item.id.clone(),
                })
            }
        };

        let entry = KnowledgeEntry::new(
            item.term.clone(),
            definition,
            item.suggested_category.clone(),
            KnowledgeScope::Customer(target),
            reviewer,
        );
        self.resolve(
            &item,
            LearningStatus::ApprovedCustomer,
            reviewer,
            None,
            &entry,
        )
        .await?;

        info!(
            item_id = %item.id,
            term = %item.term,
            customer_id = target,
            reviewer = %reviewer,
            "Learning item approved for customer"
        );
        Ok(entry)
    }

    /// Reject a pending item. No knowledge entry is written; the reason is
    /// retained for audit and pattern surfacing.
    pub async fn reject(&self, item_id: &str, reviewer: &str, reason: &str) -> Result<()> {
        let item = self.require_pending(item_id).await?;

        let transitioned = self
            .store
            .resolve_pending(
                &item.id,
                LearningStatus::Rejected,
                reviewer,
                Some(reason),
                None,
            )
            .await?;
        if !transitioned {
            return Err(self.lost_race(&item.id).await);
        }

        let rejections = self.store.rejection_count(&item.term).await?;
        if rejections >= RECURRING_REJECTION_THRESHOLD {
            // Signal only; resolution stays a human decision.
            info!(
                term = %item.term,
                rejections,
                "Term has been rejected repeatedly; may need a different resolution"
            );
        }

        info!(item_id = %item.id, term = %item.term, reviewer = %reviewer, "Learning item rejected");
        Ok(())
    }

    /// Read-only queue view for the review screen.
    pub async fn list_by_status(&self, filter: StatusFilter) -> Result<Vec<LearningItem>> {
        Ok(self.store.list(filter).await?)
    }

    /// Per-status counts for the queue header.
    pub async fn tallies(&self) -> Result<QueueTallies> {
        let items = self.store.list(StatusFilter::All).await?;
        let mut tallies = QueueTallies::default();
        for item in &items {
            match item.status {
                LearningStatus::Pending => tallies.pending += 1,
                LearningStatus::ApprovedGlobal => tallies.approved_global += 1,
                LearningStatus::ApprovedCustomer => tallies.approved_customer += 1,
                LearningStatus::Rejected => tallies.rejected += 1,
                LearningStatus::Merged => tallies.merged += 1,
            }
        }
        Ok(tallies)
    }

    /// How many times `term` has been rejected so far.
    pub async fn rejection_pattern(&self, term: &str) -> Result<u64> {
        Ok(self.store.rejection_count(term).await?)
    }

    /// Batch maintenance: collapse the customer-scoped approvals for `term`
    /// into one global entry, marking the superseded items `merged` and
    /// removing their customer-scope entries. The reviewer decides that the
    /// definitions are equivalent; no automatic detection is attempted.
    /// Returns the number of items merged; `0` means nothing was written.
    pub async fn promote_to_global(
        &self,
        term: &str,
        definition: &str,
        category: &str,
        reviewer: &str,
    ) -> Result<u64> {
        let entry = KnowledgeEntry::new(
            term,
            definition,
            category,
            KnowledgeScope::Global,
            reviewer,
        );
        let merged = self
            .store
            .merge_customer_approvals(term, reviewer, &entry)
            .await?;
        if merged == 0 {
            info!(term = %term, "No customer approvals to promote; nothing written");
        } else {
            info!(term = %term, merged, reviewer = %reviewer, "Promoted term to global");
        }
        Ok(merged)
    }

    async fn require_pending(&self, item_id: &str) -> Result<LearningItem> {
        let item = self
            .store
            .get(item_id)
            .await?
            .ok_or(GovernanceError::Unknown {
                entity: "learning item",
                id: item_id.to_string(),
            })?;
        if item.status.is_terminal() {
            return Err(GovernanceError::InvalidStateTransition {
                entity: "learning item",
                id: item.id,
                state: item.status.as_str().to_string(),
            });
        }
        Ok(item)
    }

    async fn resolve(
        &self,
        item: &LearningItem,
        to: LearningStatus,
        reviewer: &str,
        reason: Option<&str>,
        entry: &KnowledgeEntry,
    ) -> Result<()> {
        let transitioned = self
            .store
            .resolve_pending(&item.id, to, reviewer, reason, Some(entry))
            .await?;
        if !transitioned {
            return Err(self.lost_race(&item.id).await);
        }
        Ok(())
    }

    /// The guarded transition matched zero rows: a concurrent reviewer won.
    /// Report the state they left the item in.
    async fn lost_race(&self, item_id: &str) -> GovernanceError {
        let state = match self.store.get(item_id).await {
            Ok(Some(item)) => item.status.as_str().to_string(),
            _ => "unknown".to_string(),
        };
        GovernanceError::InvalidStateTransition {
            entity: "learning item",
            id: item_id.to_string(),
            state,
        }
    }
}

/// Fuzzy similar-term surfacing: existing terms scoring above the
/// Jaro-Winkler threshold, best first, excluding the exact term itself.
pub fn similar_terms(existing: &[String], term: &str) -> Vec<String> {
    let needle = term.to_lowercase();
    let mut scored: Vec<(f64, &String)> = existing
        .iter()
        .filter(|t| t.to_lowercase() != needle)
        .filter_map(|t| {
            let score = strsim::jaro_winkler(&t.to_lowercase(), &needle);
            (score >= SIMILARITY_THRESHOLD).then_some((score, t))
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(MAX_SIMILAR_TERMS)
        .map(|(_, t)| t.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SqliteStore;
    use crate::types::ScopeHint;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn queue() -> (LearningQueue, Arc<SqliteStore>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = Arc::new(SqliteStore::new(pool).await.unwrap());
        (LearningQueue::new(store.clone(), store.clone()), store)
    }

    fn candidate(term: &str, customer_id: Option<CustomerId>) -> LearningCandidate {
        LearningCandidate {
            term: term.to_string(),
            original_query: format!("what does {term} mean?"),
            user_explanation: None,
            ai_interpretation: format!("inferred meaning of {term}"),
            suggested_scope: if customer_id.is_some() {
                ScopeHint::Customer
            } else {
                ScopeHint::Global
            },
            suggested_category: "freight".to_string(),
            confidence_score: 0.8,
            customer_id,
        }
    }

    async fn seed_entry(store: &SqliteStore, term: &str, scope: KnowledgeScope) {
        let entry = KnowledgeEntry::new(term, "seeded definition", "freight", scope, "seed");
        store.write(&entry).await.unwrap();
    }

    #[tokio::test]
    async fn submit_snapshots_conflicts_and_similar_terms() {
        let (queue, store) = queue().await;
        seed_entry(&store, "linehaul", KnowledgeScope::Global).await;
        seed_entry(&store, "line haul rate", KnowledgeScope::Customer(7)).await;

        let item = queue.submit(candidate("Linehaul", Some(7))).await.unwrap();
        assert!(item.conflicts_with_global);
        assert!(!item.conflicts_with_customer);
        assert!(item
            .similar_existing_terms
            .contains(&"line haul rate".to_string()));
        assert_eq!(item.status, LearningStatus::Pending);
    }

    #[tokio::test]
    async fn submit_flags_customer_conflict_only_for_the_same_customer() {
        let (queue, store) = queue().await;
        seed_entry(&store, "drop trailer", KnowledgeScope::Customer(7)).await;

        let same = queue
            .submit(candidate("drop trailer", Some(7)))
            .await
            .unwrap();
        assert!(same.conflicts_with_customer);
        assert!(!same.conflicts_with_global);

        let other = queue
            .submit(candidate("drop trailer", Some(8)))
            .await
            .unwrap();
        assert!(!other.conflicts_with_customer);
    }

    #[tokio::test]
    async fn conflict_flags_are_never_updated_retroactively() {
        let (queue, store) = queue().await;
        let item = queue.submit(candidate("backhaul", None)).await.unwrap();
        assert!(!item.conflicts_with_global);

        // Knowledge written after submission does not rewrite the snapshot.
        seed_entry(&store, "backhaul", KnowledgeScope::Global).await;
        let refetched = store.get(&item.id).await.unwrap().unwrap();
        assert!(!refetched.conflicts_with_global);
    }

    #[tokio::test]
    async fn approve_as_global_writes_the_entry_and_closes_the_item() {
        let (queue, store) = queue().await;
        let item = queue.submit(candidate("deadhead", None)).await.unwrap();

        let entry = queue
            .approve_as_global(&item.id, "miles driven without a load", "ops-lead")
            .await
            .unwrap();
        assert_eq!(entry.scope, KnowledgeScope::Global);

        let stored = store.lookup("deadhead", None).await.unwrap().unwrap();
        assert_eq!(stored.definition, "miles driven without a load");

        let resolved = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(resolved.status, LearningStatus::ApprovedGlobal);
        assert_eq!(resolved.reviewed_by.as_deref(), Some("ops-lead"));
        assert!(resolved.resolved_at.is_some());
    }

    #[tokio::test]
    async fn approving_a_conflicted_term_replaces_the_global_definition() {
        let (queue, store) = queue().await;
        seed_entry(&store, "linehaul", KnowledgeScope::Global).await;

        let item = queue.submit(candidate("linehaul", None)).await.unwrap();
        assert!(item.conflicts_with_global);

        // The approval is the conflict resolution: it overwrites the old
        // definition instead of failing on it.
        queue
            .approve_as_global(&item.id, "the long-distance leg of a move", "ops-lead")
            .await
            .unwrap();

        let stored = store
            .lookup_scoped("linehaul", KnowledgeScope::Global)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.definition, "the long-distance leg of a move");
        assert_eq!(stored.created_by, "ops-lead");

        let resolved = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(resolved.status, LearningStatus::ApprovedGlobal);
    }

    #[tokio::test]
    async fn approving_a_conflicted_customer_term_replaces_that_definition() {
        let (queue, store) = queue().await;
        seed_entry(&store, "drop trailer", KnowledgeScope::Customer(7)).await;

        let item = queue
            .submit(candidate("drop trailer", Some(7)))
            .await
            .unwrap();
        assert!(item.conflicts_with_customer);

        queue
            .approve_as_customer(&item.id, None, "trailer left for later loading", "ops-lead")
            .await
            .unwrap();

        let stored = store
            .lookup_scoped("drop trailer", KnowledgeScope::Customer(7))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.definition, "trailer left for later loading");
    }

    #[tokio::test]
    async fn promote_to_global_replaces_an_existing_global_entry() {
        let (queue, store) = queue().await;
        seed_entry(&store, "lumper fee", KnowledgeScope::Global).await;

        let item = queue.submit(candidate("lumper fee", Some(3))).await.unwrap();
        queue
            .approve_as_customer(&item.id, None, "unloading labor charge", "r")
            .await
            .unwrap();

        let merged = queue
            .promote_to_global("lumper fee", "unloading labor charge", "freight", "ops-lead")
            .await
            .unwrap();
        assert_eq!(merged, 1);

        let global = store
            .lookup_scoped("lumper fee", KnowledgeScope::Global)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(global.definition, "unloading labor charge");
    }

    #[tokio::test]
    async fn approve_as_customer_defaults_to_the_originating_customer() {
        let (queue, store) = queue().await;
        let item = queue.submit(candidate("pallet jack", Some(42))).await.unwrap();

        let entry = queue
            .approve_as_customer(&item.id, None, "their in-house term", "ops-lead")
            .await
            .unwrap();
        assert_eq!(entry.scope, KnowledgeScope::Customer(42));
        assert!(store
            .lookup_scoped("pallet jack", KnowledgeScope::Customer(42))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn approve_as_customer_honors_an_explicit_override() {
        let (queue, _) = queue().await;
        let item = queue.submit(candidate("pallet jack", Some(42))).await.unwrap();

        let entry = queue
            .approve_as_customer(&item.id, Some(99), "definition", "ops-lead")
            .await
            .unwrap();
        assert_eq!(entry.scope, KnowledgeScope::Customer(99));
    }

    #[tokio::test]
    async fn approve_as_customer_without_any_customer_fails() {
        let (queue, _) = queue().await;
        let item = queue.submit(candidate("orphan term", None)).await.unwrap();

        let err = queue
            .approve_as_customer(&item.id, None, "definition", "ops-lead")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::NoCustomerScope { .. }));
    }

    #[tokio::test]
    async fn resolved_items_cannot_be_resolved_again() {
        let (queue, _) = queue().await;
        let item = queue.submit(candidate("otif", None)).await.unwrap();
        queue
            .approve_as_global(&item.id, "on time in full", "ops-lead")
            .await
            .unwrap();

        let err = queue
            .reject(&item.id, "other-reviewer", "duplicate")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::InvalidStateTransition { .. }
        ));
    }

    #[tokio::test]
    async fn reject_retains_the_reason_and_counts_toward_the_pattern() {
        let (queue, store) = queue().await;
        for _ in 0..3 {
            let item = queue.submit(candidate("reefer", None)).await.unwrap();
            queue
                .reject(&item.id, "ops-lead", "already covered by refrigerated")
                .await
                .unwrap();
        }

        assert_eq!(queue.rejection_pattern("reefer").await.unwrap(), 3);
        assert!(store.lookup("reefer", None).await.unwrap().is_none());

        let rejected = queue
            .list_by_status(StatusFilter::Only(LearningStatus::Rejected))
            .await
            .unwrap();
        assert_eq!(rejected.len(), 3);
        assert_eq!(
            rejected[0].rejection_reason.as_deref(),
            Some("already covered by refrigerated")
        );
    }

    #[tokio::test]
    async fn tallies_cover_every_status() {
        let (queue, _) = queue().await;
        let a = queue.submit(candidate("term-a", None)).await.unwrap();
        let b = queue.submit(candidate("term-b", Some(5))).await.unwrap();
        let c = queue.submit(candidate("term-c", None)).await.unwrap();
        queue.approve_as_global(&a.id, "def a", "r").await.unwrap();
        queue
            .approve_as_customer(&b.id, None, "def b", "r")
            .await
            .unwrap();
        queue.reject(&c.id, "r", "noise").await.unwrap();
        queue.submit(candidate("term-d", None)).await.unwrap();

        let tallies = queue.tallies().await.unwrap();
        assert_eq!(tallies.pending, 1);
        assert_eq!(tallies.approved_global, 1);
        assert_eq!(tallies.approved_customer, 1);
        assert_eq!(tallies.rejected, 1);
        assert_eq!(tallies.merged, 0);
    }

    #[tokio::test]
    async fn promote_to_global_collapses_customer_approvals() {
        let (queue, store) = queue().await;
        let a = queue.submit(candidate("lumper fee", Some(1))).await.unwrap();
        let b = queue.submit(candidate("lumper fee", Some(2))).await.unwrap();
        queue
            .approve_as_customer(&a.id, None, "fee for unloading labor", "r")
            .await
            .unwrap();
        queue
            .approve_as_customer(&b.id, None, "unloading labor charge", "r")
            .await
            .unwrap();

        let merged = queue
            .promote_to_global("lumper fee", "fee for unloading labor", "freight", "ops-lead")
            .await
            .unwrap();
        assert_eq!(merged, 2);

        // Customer entries are superseded by the single global one.
        let global = store
            .lookup_scoped("lumper fee", KnowledgeScope::Global)
            .await
            .unwrap();
        assert!(global.is_some());
        assert!(store
            .lookup_scoped("lumper fee", KnowledgeScope::Customer(1))
            .await
            .unwrap()
            .is_none());

        let tallies = queue.tallies().await.unwrap();
        assert_eq!(tallies.merged, 2);
        assert_eq!(tallies.approved_customer, 0);
    }

    #[tokio::test]
    async fn promote_with_no_customer_approvals_writes_nothing() {
        let (queue, store) = queue().await;
        let merged = queue
            .promote_to_global("unknown term", "def", "freight", "ops-lead")
            .await
            .unwrap();
        assert_eq!(merged, 0);
        assert!(store.lookup("unknown term", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_item_id_is_reported_as_such() {
        let (queue, _) = queue().await;
        let err = queue
            .approve_as_global("no-such-id", "def", "r")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Unknown { .. }));
    }

    #[tokio::test]
    async fn confidence_is_clamped_into_range() {
        let (queue, _) = queue().await;
        let mut wild = candidate("bobtail", None);
        wild.confidence_score = 3.5;
        let item = queue.submit(wild).await.unwrap();
        assert!((item.confidence_score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn similar_terms_excludes_exact_match_case_insensitively() {
        let existing = vec![
            "Linehaul".to_string(),
            "Line Haul Rate".to_string(),
            "Detention".to_string(),
        ];
        let similar = similar_terms(&existing, "linehaul");
        assert!(!similar.contains(&"Linehaul".to_string()));
        assert!(similar.contains(&"Line Haul Rate".to_string()));
        assert!(!similar.contains(&"Detention".to_string()));
    }

    #[test]
    fn similar_terms_ranked_best_first_and_capped() {
        let existing: Vec<String> = (0..10).map(|i| format!("accessorial-{}", i)).collect();
        let similar = similar_terms(&existing, "accessorial");
        assert!(similar.len() <= MAX_SIMILAR_TERMS);
        assert!(!similar.is_empty());
    }

    #[test]
    fn dissimilar_terms_are_not_surfaced() {
        let existing = vec!["Fuel Surcharge".to_string(), "OTIF".to_string()];
        assert!(similar_terms(&existing, "deadhead miles").is_empty());
    }
}
