//! Vote reads and the winner-calculation transaction.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

use super::{fmt_datetime, is_constraint_violation, SqliteStore, StoreError};
use crate::error::EngineError;
use crate::lifecycle::tally::summarize;
use crate::model::{
    CandidateId, ElectionId, ElectionStatus, MemberId, TallyOutcome, TallySummary,
};

impl SqliteStore {
    /// Record one cast ballot. Votes are immutable; the unique
    /// (election, member) constraint is what lets the tally trust
    /// one-vote-per-member.
    pub async fn record_vote(
        &self,
        election_id: ElectionId,
        member_id: MemberId,
        candidate_id: CandidateId,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        self.call("record_vote", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("record_vote", e.to_string()))?;

            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM elections WHERE election_id = ?1",
                    params![election_id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("record_vote", e.to_string()))?;
            let status = status.ok_or(EngineError::NotFound("election"))?;
            if status != ElectionStatus::Active.as_str() {
                return Err(EngineError::invalid_state(format!(
                    "election is not accepting votes (status {})",
                    status
                )));
            }

            let eligible: Option<(bool, bool)> = tx
                .query_row(
                    "SELECT is_active, is_eligible FROM members WHERE member_id = ?1",
                    params![member_id.0],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| StoreError::storage("record_vote", e.to_string()))?;
            let (is_active, is_eligible) = eligible.ok_or(EngineError::NotFound("member"))?;
            if !is_active || !is_eligible {
                return Err(EngineError::validation("member is not eligible to vote"));
            }

            let candidate_ok: Option<i64> = tx
                .query_row(
                    "SELECT candidate_id FROM candidates
                     WHERE candidate_id = ?1 AND election_id = ?2 AND status = 'APPROVED'",
                    params![candidate_id.0, election_id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("record_vote", e.to_string()))?;
            if candidate_ok.is_none() {
                return Err(EngineError::NotFound("candidate"));
            }

            tx.execute(
                "INSERT INTO votes (election_id, member_id, candidate_id, voted_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![election_id.0, member_id.0, candidate_id.0, fmt_datetime(now)],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    EngineError::conflict("member has already voted in this election")
                } else {
                    StoreError::storage("record_vote", e.to_string()).into()
                }
            })?;

            tx.commit()
                .map_err(|e| StoreError::storage("record_vote", e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// Per-candidate vote counts for one election.
    pub async fn count_votes_by_candidate(
        &self,
        election_id: ElectionId,
    ) -> Result<Vec<(CandidateId, u64)>, EngineError> {
        self.call("count_votes_by_candidate", move |conn| {
            grouped_vote_counts(conn, election_id)
                .map_err(|e| StoreError::storage("count_votes_by_candidate", e.to_string()).into())
        })
        .await
    }

    /// Elections whose voting has ended but whose result has not been
    /// tallied yet. The scheduler drains this list every tick.
    pub async fn elections_pending_tally(&self) -> Result<Vec<ElectionId>, EngineError> {
        self.call("elections_pending_tally", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT election_id FROM elections
                     WHERE status = ?1 AND result_calculated = 0
                     ORDER BY election_id",
                )
                .map_err(|e| StoreError::storage("elections_pending_tally", e.to_string()))?;
            let rows = stmt
                .query_map(params![ElectionStatus::Completed.as_str()], |row| {
                    Ok(ElectionId(row.get(0)?))
                })
                .map_err(|e| StoreError::storage("elections_pending_tally", e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::storage("elections_pending_tally", e.to_string()).into())
        })
        .await
    }

    /// Aggregate the vote ledger into per-candidate counts and winner
    /// flags, then persist the one-way `result_calculated` transition.
    ///
    /// Idempotent: once the flag is set, the call reports
    /// `AlreadyCalculated`. All writes commit as one transaction; a
    /// crash before commit leaves the flag clear and the operation
    /// retryable on the next scheduler tick.
    pub async fn calculate_result(
        &self,
        election_id: ElectionId,
    ) -> Result<TallyOutcome, EngineError> {
        self.call("calculate_result", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("calculate_result", e.to_string()))?;

            let election: Option<(bool, bool)> = tx
                .query_row(
                    "SELECT result_calculated, result_published
                     FROM elections WHERE election_id = ?1",
                    params![election_id.0],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| StoreError::storage("calculate_result", e.to_string()))?;
            let (result_calculated, result_published) =
                election.ok_or(EngineError::NotFound("election"))?;

            if result_calculated {
                return Ok(TallyOutcome::AlreadyCalculated);
            }
            if result_published {
                return Err(EngineError::invalid_state(
                    "result is published; unpublish before recalculating",
                ));
            }

            let vote_counts = grouped_vote_counts(&tx, election_id)
                .map_err(|e| StoreError::storage("calculate_result", e.to_string()))?;
            if vote_counts.is_empty() {
                return Err(EngineError::NoVotesCast);
            }

            let (total_votes, max_votes, winners, winner_percentage) = summarize(&vote_counts);

            tx.execute(
                "UPDATE candidates SET vote_count = 0, is_winner = 0
                 WHERE election_id = ?1",
                params![election_id.0],
            )
            .map_err(|e| StoreError::storage("calculate_result", e.to_string()))?;

            for (candidate_id, count) in &vote_counts {
                tx.execute(
                    "UPDATE candidates SET vote_count = ?2, is_winner = ?3
                     WHERE candidate_id = ?1",
                    params![candidate_id.0, *count as i64, *count == max_votes],
                )
                .map_err(|e| StoreError::storage("calculate_result", e.to_string()))?;
            }

            // The flag check is part of the write: if another tally
            // committed since our read, this affects zero rows and we
            // drop the transaction.
            let changed = tx
                .execute(
                    "UPDATE elections
                     SET status = ?2, total_votes = ?3, result_calculated = 1,
                         winner_percentage = ?4
                     WHERE election_id = ?1 AND result_calculated = 0",
                    params![
                        election_id.0,
                        ElectionStatus::Completed.as_str(),
                        total_votes as i64,
                        winner_percentage,
                    ],
                )
                .map_err(|e| StoreError::storage("calculate_result", e.to_string()))?;
            if changed == 0 {
                return Ok(TallyOutcome::AlreadyCalculated);
            }

            tx.commit()
                .map_err(|e| StoreError::storage("calculate_result", e.to_string()))?;

            Ok(TallyOutcome::Calculated(TallySummary {
                election_id,
                total_votes,
                max_votes,
                winners,
                winner_percentage,
            }))
        })
        .await
    }
}

fn grouped_vote_counts(
    conn: &rusqlite::Connection,
    election_id: ElectionId,
) -> Result<Vec<(CandidateId, u64)>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT candidate_id, COUNT(vote_id) FROM votes
         WHERE election_id = ?1
         GROUP BY candidate_id
         ORDER BY candidate_id",
    )?;
    let rows = stmt.query_map(params![election_id.0], |row| {
        Ok((
            CandidateId(row.get(0)?),
            row.get::<_, i64>(1)?.max(0) as u64,
        ))
    })?;
    rows.collect()
}
