//! Election lifecycle engine.
//!
//! This module owns the operations the rest of the system calls:
//! scheduling an event, the boundary-driven status transitions, the
//! nomination review workflow, winner calculation, and the result
//! publication gate. Each operation is one transactional unit in the
//! store; the engine adds input validation, the clock, logging, and
//! post-commit notification dispatch.

pub mod status;
pub mod tally;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::model::{
    AdminId, AssemblyId, CandidateId, ElectionId, ElectionStatus, EventId, EventWindows, MemberId,
    Nomination, NominationId, NominationProfile, TallyOutcome, WardId,
};
use crate::notify::Notifier;
use crate::store::{SqliteStore, StatusAdvance};

/// Shortest acceptable rejection reason, after trimming.
pub const MIN_REJECTION_REASON_LEN: usize = 5;

/// One candidate's standing in a result summary.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateStanding {
    pub candidate_id: CandidateId,
    pub member_id: MemberId,
    pub vote_count: u64,
    pub is_winner: bool,
}

/// Result summary for one election.
#[derive(Debug, Clone, Serialize)]
pub struct ElectionResult {
    pub election_id: ElectionId,
    pub title: String,
    pub status: ElectionStatus,
    pub total_votes: u64,
    pub winner_percentage: f64,
    pub result_published: bool,
    pub candidates: Vec<CandidateStanding>,
}

/// The engine facade. Cheap to clone; all fields are shared.
#[derive(Clone)]
pub struct Engine {
    store: Arc<SqliteStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl Engine {
    pub fn new(store: Arc<SqliteStore>, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            clock,
            notifier,
        }
    }

    /// Direct read access to the backing store.
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Create an event and one `SCHEDULED` election per ward.
    ///
    /// This is the only way an election leaves `DRAFT`; the periodic
    /// transition pass never touches drafts.
    pub async fn schedule_event(
        &self,
        assembly_id: AssemblyId,
        admin_id: AdminId,
        title: String,
        windows: EventWindows,
        ward_ids: Vec<WardId>,
    ) -> Result<(EventId, Vec<ElectionId>), EngineError> {
        windows.validate().map_err(EngineError::Validation)?;
        if ward_ids.is_empty() {
            return Err(EngineError::validation("at least one ward is required"));
        }

        let now = self.clock.now();
        let (event_id, election_ids) = self
            .store
            .schedule_event(assembly_id, admin_id, title, windows, ward_ids, now)
            .await?;

        info!(
            "scheduled event {} with {} ward election(s)",
            event_id,
            election_ids.len()
        );
        Ok((event_id, election_ids))
    }

    /// Advance every election to the status its event boundaries
    /// dictate right now. Idempotent; safe under overlapping callers.
    pub async fn advance_all_statuses(&self) -> Result<StatusAdvance, EngineError> {
        let now = self.clock.now();
        let advance = self.store.advance_all_statuses(now).await?;
        if advance.total() > 0 {
            info!(
                "status pass at {}: {} nomination_open, {} ready_for_poll, {} active, {} completed",
                now,
                advance.nomination_open,
                advance.ready_for_poll,
                advance.active,
                advance.completed
            );
        }
        Ok(advance)
    }

    /// File a member's application to stand in an election.
    pub async fn apply_nomination(
        &self,
        election_id: ElectionId,
        member_id: MemberId,
        profile: NominationProfile,
    ) -> Result<Nomination, EngineError> {
        let now = self.clock.now();
        let nomination = self
            .store
            .apply_nomination(election_id, member_id, profile, now)
            .await?;
        info!(
            "nomination {} filed by member {} for election {}",
            nomination.nomination_id, member_id, election_id
        );
        Ok(nomination)
    }

    /// Approve a pending nomination, creating the candidate.
    pub async fn approve_nomination(
        &self,
        nomination_id: NominationId,
        admin_id: AdminId,
        notes: Option<String>,
    ) -> Result<CandidateId, EngineError> {
        let now = self.clock.now();
        let candidate_id = self
            .store
            .approve_nomination(nomination_id, admin_id, notes, now)
            .await?;
        info!(
            "nomination {} approved by admin {} as candidate {}",
            nomination_id, admin_id, candidate_id
        );
        Ok(candidate_id)
    }

    /// Reject a pending nomination with a reason.
    pub async fn reject_nomination(
        &self,
        nomination_id: NominationId,
        admin_id: AdminId,
        reason: &str,
    ) -> Result<(), EngineError> {
        let reason = reason.trim();
        if reason.chars().count() < MIN_REJECTION_REASON_LEN {
            return Err(EngineError::validation(format!(
                "rejection reason must be at least {} characters",
                MIN_REJECTION_REASON_LEN
            )));
        }

        let now = self.clock.now();
        self.store
            .reject_nomination(nomination_id, admin_id, reason.to_string(), now)
            .await?;
        info!("nomination {} rejected by admin {}", nomination_id, admin_id);
        Ok(())
    }

    /// Record one member's ballot for an approved candidate. The store
    /// enforces the one-vote-per-member rule and the `ACTIVE` window.
    pub async fn cast_vote(
        &self,
        election_id: ElectionId,
        member_id: MemberId,
        candidate_id: CandidateId,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        self.store
            .record_vote(election_id, member_id, candidate_id, now)
            .await
    }

    /// Tally one election's votes into candidate counts and winner
    /// flags. Idempotent via the `result_calculated` guard.
    pub async fn calculate_result(
        &self,
        election_id: ElectionId,
    ) -> Result<TallyOutcome, EngineError> {
        let outcome = self.store.calculate_result(election_id).await?;
        match &outcome {
            TallyOutcome::Calculated(summary) => info!(
                "election {} tallied: {} vote(s), {} winner(s) at {} ({}%)",
                election_id,
                summary.total_votes,
                summary.winners.len(),
                summary.max_votes,
                summary.winner_percentage
            ),
            TallyOutcome::AlreadyCalculated => {
                debug!("election {} already tallied, skipping", election_id)
            }
        }
        Ok(outcome)
    }

    /// Make a calculated result publicly visible and announce it.
    pub async fn publish_result(
        &self,
        election_id: ElectionId,
        admin_id: AdminId,
    ) -> Result<chrono::NaiveDateTime, EngineError> {
        let now = self.clock.now();
        let (published_at, notification) =
            self.store.publish_result(election_id, admin_id, now).await?;
        info!("election {} result published by admin {}", election_id, admin_id);

        // Dispatch is best-effort: the publish has already committed.
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(
                "failed to dispatch result notification for election {}: {}",
                election_id, e
            );
        }
        Ok(published_at)
    }

    /// Take a published result back out of public view and retract the
    /// announcement.
    pub async fn unpublish_result(
        &self,
        election_id: ElectionId,
        admin_id: AdminId,
    ) -> Result<(), EngineError> {
        let retracted = self.store.unpublish_result(election_id, admin_id).await?;
        info!(
            "election {} result unpublished by admin {}",
            election_id, admin_id
        );

        for notification in &retracted {
            if let Err(e) = self.notifier.retract(notification).await {
                warn!(
                    "failed to retract result notification for election {}: {}",
                    election_id, e
                );
            }
        }
        Ok(())
    }

    /// Result summary for one election: totals plus every candidate's
    /// standing.
    pub async fn election_result(
        &self,
        election_id: ElectionId,
    ) -> Result<ElectionResult, EngineError> {
        let election = self
            .store
            .get_election(election_id)
            .await?
            .ok_or(EngineError::NotFound("election"))?;
        if !election.result_calculated {
            return Err(EngineError::invalid_state(
                "result has not been calculated yet",
            ));
        }

        let candidates = self
            .store
            .candidates_for_election(election_id)
            .await?
            .into_iter()
            .map(|c| CandidateStanding {
                candidate_id: c.candidate_id,
                member_id: c.member_id,
                vote_count: c.vote_count,
                is_winner: c.is_winner,
            })
            .collect();

        Ok(ElectionResult {
            election_id,
            title: election.title,
            status: election.status,
            total_votes: election.total_votes,
            winner_percentage: election.winner_percentage,
            result_published: election.result_published,
            candidates,
        })
    }

    /// One scheduler tick: advance statuses, then tally every election
    /// whose voting has ended and whose result is still uncalculated.
    ///
    /// A single election's failure is logged and skipped; it must never
    /// block progress for the rest of the batch.
    pub async fn run_scheduled_pass(&self) -> Result<StatusAdvance, EngineError> {
        let advance = self.advance_all_statuses().await?;

        let pending = self.store.elections_pending_tally().await?;
        for election_id in pending {
            match self.calculate_result(election_id).await {
                Ok(_) => {}
                Err(EngineError::NoVotesCast) => {
                    debug!(
                        "election {} completed with no votes; leaving result uncalculated",
                        election_id
                    );
                }
                Err(e) => {
                    error!("failed to tally election {}: {}", election_id, e);
                }
            }
        }

        Ok(advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    use crate::clock::FixedClock;
    use crate::notify::RecordingNotifier;

    fn dt(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn windows() -> EventWindows {
        EventWindows {
            nomination_start: dt(1, 9),
            nomination_end: dt(3, 17),
            voting_start: dt(5, 8),
            voting_end: dt(5, 18),
        }
    }

    struct Fixture {
        engine: Engine,
        store: Arc<SqliteStore>,
        clock: Arc<FixedClock>,
        notifier: Arc<RecordingNotifier>,
        election_id: ElectionId,
        admin: AdminId,
    }

    impl Fixture {
        /// Engine over an in-memory store with one scheduled election,
        /// clock parked before the nomination window.
        async fn new() -> Self {
            let store = Arc::new(SqliteStore::new_in_memory().unwrap());
            let clock = Arc::new(FixedClock::at(dt(1, 0)));
            let notifier = Arc::new(RecordingNotifier::new());
            let engine = Engine::new(store.clone(), clock.clone(), notifier.clone());

            let admin = AdminId(1);
            let (_, election_ids) = engine
                .schedule_event(
                    AssemblyId(10),
                    admin,
                    "Ward panchayat election".to_string(),
                    windows(),
                    vec![WardId(100)],
                )
                .await
                .unwrap();

            Self {
                engine,
                store,
                clock,
                notifier,
                election_id: election_ids[0],
                admin,
            }
        }

        async fn add_member(&self) -> MemberId {
            self.store
                .add_member("Member".to_string(), true, true)
                .await
                .unwrap()
        }

        /// Open nominations, apply, and approve: one live candidate.
        async fn approved_candidate(&self, member: MemberId) -> CandidateId {
            self.clock.set(windows().nomination_start);
            self.engine.advance_all_statuses().await.unwrap();
            let nomination = self
                .engine
                .apply_nomination(self.election_id, member, NominationProfile::default())
                .await
                .unwrap();
            self.engine
                .approve_nomination(nomination.nomination_id, self.admin, None)
                .await
                .unwrap()
        }

        async fn status(&self) -> ElectionStatus {
            self.store
                .get_election(self.election_id)
                .await
                .unwrap()
                .unwrap()
                .status
        }

        /// Candidates A, B, C with votes {A:3, B:5, C:5}, voting over.
        async fn tied_ballot(&self) -> Vec<CandidateId> {
            let mut candidates = Vec::new();
            for _ in 0..3 {
                let member = self.add_member().await;
                candidates.push(self.approved_candidate(member).await);
            }

            self.clock.set(windows().voting_start);
            self.engine.advance_all_statuses().await.unwrap();
            for (i, &candidate) in candidates.iter().enumerate() {
                let votes = [3u64, 5, 5][i];
                for _ in 0..votes {
                    let voter = self.add_member().await;
                    self.engine
                        .cast_vote(self.election_id, voter, candidate)
                        .await
                        .unwrap();
                }
            }

            self.clock.set(windows().voting_end);
            self.engine.advance_all_statuses().await.unwrap();
            candidates
        }
    }

    #[tokio::test]
    async fn test_schedule_rejects_inverted_windows() {
        let fx = Fixture::new().await;
        let mut bad = windows();
        bad.voting_end = bad.voting_start - Duration::hours(1);
        let err = fx
            .engine
            .schedule_event(AssemblyId(10), fx.admin, "x".into(), bad, vec![WardId(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_schedule_rejects_empty_ward_list() {
        let fx = Fixture::new().await;
        let err = fx
            .engine
            .schedule_event(AssemblyId(10), fx.admin, "x".into(), windows(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_status_follows_event_boundaries() {
        let fx = Fixture::new().await;
        assert_eq!(fx.status().await, ElectionStatus::Scheduled);

        fx.clock.set(windows().nomination_start);
        fx.engine.advance_all_statuses().await.unwrap();
        assert_eq!(fx.status().await, ElectionStatus::NominationOpen);

        fx.clock.set(windows().nomination_end + Duration::seconds(1));
        fx.engine.advance_all_statuses().await.unwrap();
        assert_eq!(fx.status().await, ElectionStatus::ReadyForPoll);

        fx.clock.set(windows().voting_start);
        fx.engine.advance_all_statuses().await.unwrap();
        assert_eq!(fx.status().await, ElectionStatus::Active);

        fx.clock.set(windows().voting_end);
        fx.engine.advance_all_statuses().await.unwrap();
        assert_eq!(fx.status().await, ElectionStatus::Completed);
    }

    #[tokio::test]
    async fn test_status_pass_is_idempotent() {
        let fx = Fixture::new().await;
        fx.clock.set(windows().nomination_start);

        let first = fx.engine.advance_all_statuses().await.unwrap();
        assert_eq!(first.nomination_open, 1);

        let second = fx.engine.advance_all_statuses().await.unwrap();
        assert_eq!(second.total(), 0);
        assert_eq!(fx.status().await, ElectionStatus::NominationOpen);
    }

    #[tokio::test]
    async fn test_apply_requires_open_nominations() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;

        // Still SCHEDULED: the window has not opened.
        let err = fx
            .engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_apply_rejects_duplicate_nomination() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        fx.clock.set(windows().nomination_start);
        fx.engine.advance_all_statuses().await.unwrap();

        fx.engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await
            .unwrap();
        let err = fx
            .engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_apply_allows_reapplying_after_rejection() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        fx.clock.set(windows().nomination_start);
        fx.engine.advance_all_statuses().await.unwrap();

        let first = fx
            .engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await
            .unwrap();
        fx.engine
            .reject_nomination(first.nomination_id, fx.admin, "incomplete profile")
            .await
            .unwrap();

        // The rejected record no longer blocks a fresh application.
        fx.engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_approve_records_decision_and_candidate() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        let candidate_id = fx.approved_candidate(member).await;

        let nomination = fx
            .store
            .get_nomination(crate::model::NominationId(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(nomination.status, crate::model::ReviewStatus::Approved);
        assert_eq!(nomination.candidate_id, Some(candidate_id));
        assert_eq!(nomination.reviewed_by, Some(fx.admin));
        assert!(nomination.reviewed_at.is_some());

        let candidates = fx
            .store
            .candidates_for_election(fx.election_id)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].vote_count, 0);
        assert!(!candidates[0].is_winner);
    }

    #[tokio::test]
    async fn test_approve_is_exactly_once() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        fx.clock.set(windows().nomination_start);
        fx.engine.advance_all_statuses().await.unwrap();
        let nomination = fx
            .engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await
            .unwrap();

        fx.engine
            .approve_nomination(nomination.nomination_id, fx.admin, None)
            .await
            .unwrap();
        let err = fx
            .engine
            .approve_nomination(nomination.nomination_id, AdminId(2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let candidates = fx
            .store
            .candidates_for_election(fx.election_id)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_two_nominations_for_same_member_yield_one_candidate() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        fx.clock.set(windows().nomination_start);
        fx.engine.advance_all_statuses().await.unwrap();

        let first = fx
            .engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await
            .unwrap();
        fx.engine
            .reject_nomination(first.nomination_id, fx.admin, "resubmit with bio")
            .await
            .unwrap();
        let second = fx
            .engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await
            .unwrap();

        // Approving the rejected one is refused; approving the live one
        // succeeds; a third approval attempt conflicts on candidacy.
        let err = fx
            .engine
            .approve_nomination(first.nomination_id, fx.admin, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        fx.engine
            .approve_nomination(second.nomination_id, fx.admin, None)
            .await
            .unwrap();

        let third = fx
            .engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await;
        // The live nomination index blocks the new application outright.
        assert!(matches!(third, Err(EngineError::Conflict(_))));

        let candidates = fx
            .store
            .candidates_for_election(fx.election_id)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_reject_requires_minimum_reason() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        fx.clock.set(windows().nomination_start);
        fx.engine.advance_all_statuses().await.unwrap();
        let nomination = fx
            .engine
            .apply_nomination(fx.election_id, member, NominationProfile::default())
            .await
            .unwrap();

        for bad in ["", "no", "   ok   "] {
            let err = fx
                .engine
                .reject_nomination(nomination.nomination_id, fx.admin, bad)
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "reason {:?}", bad);
        }

        fx.engine
            .reject_nomination(nomination.nomination_id, fx.admin, "  too few signatures  ")
            .await
            .unwrap();
        let stored = fx
            .store
            .get_nomination(nomination.nomination_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.rejection_reason.as_deref(), Some("too few signatures"));
    }

    #[tokio::test]
    async fn test_vote_requires_active_window() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        let candidate = fx.approved_candidate(member).await;

        // Still NOMINATION_OPEN.
        let voter = fx.add_member().await;
        let err = fx
            .engine
            .cast_vote(fx.election_id, voter, candidate)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_member_votes_at_most_once() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        let candidate = fx.approved_candidate(member).await;
        fx.clock.set(windows().voting_start);
        fx.engine.advance_all_statuses().await.unwrap();

        let voter = fx.add_member().await;
        fx.engine
            .cast_vote(fx.election_id, voter, candidate)
            .await
            .unwrap();
        let err = fx
            .engine
            .cast_vote(fx.election_id, voter, candidate)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_vote_rejects_foreign_candidate() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        fx.approved_candidate(member).await;
        fx.clock.set(windows().voting_start);
        fx.engine.advance_all_statuses().await.unwrap();

        let voter = fx.add_member().await;
        let err = fx
            .engine
            .cast_vote(fx.election_id, voter, CandidateId(424242))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_tally_tie_marks_all_max_candidates() {
        let fx = Fixture::new().await;
        let candidates = fx.tied_ballot().await;

        let outcome = fx.engine.calculate_result(fx.election_id).await.unwrap();
        let summary = match outcome {
            TallyOutcome::Calculated(s) => s,
            other => panic!("expected calculated, got {:?}", other),
        };
        assert_eq!(summary.total_votes, 13);
        assert_eq!(summary.max_votes, 5);
        assert_eq!(summary.winner_percentage, 38.46);
        assert_eq!(summary.winners, vec![candidates[1], candidates[2]]);

        let standings = fx
            .store
            .candidates_for_election(fx.election_id)
            .await
            .unwrap();
        let by_id = |id: CandidateId| standings.iter().find(|c| c.candidate_id == id).unwrap();
        assert!(!by_id(candidates[0]).is_winner);
        assert!(by_id(candidates[1]).is_winner);
        assert!(by_id(candidates[2]).is_winner);

        let election = fx
            .store
            .get_election(fx.election_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(election.total_votes, 13);
        assert!(election.result_calculated);
        assert_eq!(election.winner_percentage, 38.46);
        assert_eq!(
            standings.iter().map(|c| c.vote_count).sum::<u64>(),
            election.total_votes
        );
    }

    #[tokio::test]
    async fn test_tally_is_idempotent() {
        let fx = Fixture::new().await;
        fx.tied_ballot().await;

        let first = fx.engine.calculate_result(fx.election_id).await.unwrap();
        assert!(matches!(first, TallyOutcome::Calculated(_)));
        let standings_before = fx
            .store
            .candidates_for_election(fx.election_id)
            .await
            .unwrap();

        let second = fx.engine.calculate_result(fx.election_id).await.unwrap();
        assert_eq!(second, TallyOutcome::AlreadyCalculated);

        let standings_after = fx
            .store
            .candidates_for_election(fx.election_id)
            .await
            .unwrap();
        assert_eq!(standings_before, standings_after);
    }

    #[tokio::test]
    async fn test_tally_with_no_votes_reports_no_votes_cast() {
        let fx = Fixture::new().await;
        let member = fx.add_member().await;
        fx.approved_candidate(member).await;
        fx.clock.set(windows().voting_end);
        fx.engine.advance_all_statuses().await.unwrap();

        let err = fx.engine.calculate_result(fx.election_id).await.unwrap_err();
        assert!(matches!(err, EngineError::NoVotesCast));

        let election = fx
            .store
            .get_election(fx.election_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!election.result_calculated);
    }

    #[tokio::test]
    async fn test_tally_missing_election_is_not_found() {
        let fx = Fixture::new().await;
        let err = fx
            .engine
            .calculate_result(ElectionId(9999))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_publish_requires_completed_and_calculated() {
        let fx = Fixture::new().await;

        let err = fx
            .engine
            .publish_result(fx.election_id, fx.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        fx.tied_ballot().await;
        // COMPLETED but not yet tallied.
        let err = fx
            .engine
            .publish_result(fx.election_id, fx.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_publish_and_unpublish_round_trip() {
        let fx = Fixture::new().await;
        fx.tied_ballot().await;
        fx.engine.calculate_result(fx.election_id).await.unwrap();

        fx.engine
            .publish_result(fx.election_id, fx.admin)
            .await
            .unwrap();

        let election = fx
            .store
            .get_election(fx.election_id)
            .await
            .unwrap()
            .unwrap();
        assert!(election.result_published);
        assert!(election.result_published_at.is_some());
        assert_eq!(fx.notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(
            fx.store
                .notifications_for_election(fx.election_id)
                .await
                .unwrap()
                .len(),
            1
        );

        // Second publish fails; the state did not change.
        let err = fx
            .engine
            .publish_result(fx.election_id, fx.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        fx.engine
            .unpublish_result(fx.election_id, fx.admin)
            .await
            .unwrap();
        let election = fx
            .store
            .get_election(fx.election_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!election.result_published);
        assert!(election.result_published_at.is_none());
        assert!(fx
            .store
            .notifications_for_election(fx.election_id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(fx.notifier.retracted.lock().unwrap().len(), 1);

        // Unpublishing again is an InvalidState, not a crash.
        let err = fx
            .engine
            .unpublish_result(fx.election_id, fx.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_publish_checks_ownership() {
        let fx = Fixture::new().await;
        fx.tied_ballot().await;
        fx.engine.calculate_result(fx.election_id).await.unwrap();

        let err = fx
            .engine
            .publish_result(fx.election_id, AdminId(999))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_recalculation_is_refused_while_published() {
        let fx = Fixture::new().await;
        fx.tied_ballot().await;
        fx.engine.calculate_result(fx.election_id).await.unwrap();
        fx.engine
            .publish_result(fx.election_id, fx.admin)
            .await
            .unwrap();

        // The calculated guard fires first: the call is a harmless no-op.
        let outcome = fx.engine.calculate_result(fx.election_id).await.unwrap();
        assert_eq!(outcome, TallyOutcome::AlreadyCalculated);
    }

    #[tokio::test]
    async fn test_election_result_summary() {
        let fx = Fixture::new().await;
        let candidates = fx.tied_ballot().await;
        fx.engine.calculate_result(fx.election_id).await.unwrap();

        let result = fx.engine.election_result(fx.election_id).await.unwrap();
        assert_eq!(result.total_votes, 13);
        assert_eq!(result.winner_percentage, 38.46);
        assert_eq!(result.candidates.len(), 3);
        // Ordered by vote count; the loser comes last.
        assert_eq!(result.candidates[2].candidate_id, candidates[0]);
        assert!(!result.candidates[2].is_winner);
    }

    #[tokio::test]
    async fn test_election_result_before_tally_is_invalid_state() {
        let fx = Fixture::new().await;
        let err = fx.engine.election_result(fx.election_id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_scheduled_pass_advances_and_tallies() {
        let fx = Fixture::new().await;
        fx.tied_ballot().await;

        // tied_ballot already advanced to COMPLETED; the pass both
        // re-asserts statuses and drains the tally backlog.
        fx.engine.run_scheduled_pass().await.unwrap();

        let election = fx
            .store
            .get_election(fx.election_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(election.status, ElectionStatus::Completed);
        assert!(election.result_calculated);
        assert_eq!(election.total_votes, 13);
    }

    #[tokio::test]
    async fn test_scheduled_pass_continues_past_voteless_elections() {
        let fx = Fixture::new().await;
        fx.tied_ballot().await;

        // A second ward election under the same boundaries, no votes.
        let (_, more) = fx
            .engine
            .schedule_event(
                AssemblyId(10),
                fx.admin,
                "Second ward".to_string(),
                windows(),
                vec![WardId(200)],
            )
            .await
            .unwrap();
        let empty_election = more[0];

        fx.clock.set(windows().voting_end);
        fx.engine.run_scheduled_pass().await.unwrap();

        let tallied = fx
            .store
            .get_election(fx.election_id)
            .await
            .unwrap()
            .unwrap();
        assert!(tallied.result_calculated);

        let untallied = fx.store.get_election(empty_election).await.unwrap().unwrap();
        assert_eq!(untallied.status, ElectionStatus::Completed);
        assert!(!untallied.result_calculated);

        // The voteless election stays on the backlog; the pass keeps
        // skipping it without disturbing the tallied one.
        fx.engine.run_scheduled_pass().await.unwrap();
        let tallied_again = fx
            .store
            .get_election(fx.election_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tallied, tallied_again);
    }
}
