//! Nomination workflow: apply, approve, reject.
//!
//! Approve and reject are the two operations with a real write race
//! (two admins acting on the same nomination, or two approvals racing
//! to create the same candidacy). Both are closed the same way: the
//! decisive write is a conditional `UPDATE ... WHERE status = 'PENDING'`
//! inside the transaction, backed by a partial unique index on live
//! candidacies.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

use super::{
    fmt_datetime, is_constraint_violation, nomination_from_row, parse_review_status, SqliteStore,
    StoreError, SELECT_NOMINATION,
};
use crate::error::EngineError;
use crate::model::{
    AdminId, Candidate, CandidateId, ElectionId, ElectionStatus, MemberId, Nomination,
    NominationId, NominationProfile, ReviewStatus,
};

impl SqliteStore {
    /// File a nomination for (election, member).
    ///
    /// Preconditions checked in the transaction: the election exists and
    /// is open for nominations, the member exists and is active and
    /// eligible, and no live (non-rejected) nomination exists for the
    /// pair. The last check is also a partial unique index, so two
    /// concurrent applications cannot both succeed.
    pub async fn apply_nomination(
        &self,
        election_id: ElectionId,
        member_id: MemberId,
        profile: NominationProfile,
        now: NaiveDateTime,
    ) -> Result<Nomination, EngineError> {
        self.call("apply_nomination", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("apply_nomination", e.to_string()))?;

            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM elections WHERE election_id = ?1",
                    params![election_id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("apply_nomination", e.to_string()))?;
            let status = status.ok_or(EngineError::NotFound("election"))?;
            if status != ElectionStatus::NominationOpen.as_str() {
                return Err(EngineError::invalid_state(format!(
                    "election is {}; nominations are not open",
                    status
                )));
            }

            let member: Option<(bool, bool)> = tx
                .query_row(
                    "SELECT is_active, is_eligible FROM members WHERE member_id = ?1",
                    params![member_id.0],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| StoreError::storage("apply_nomination", e.to_string()))?;
            let (is_active, is_eligible) = member.ok_or(EngineError::NotFound("member"))?;
            if !is_active || !is_eligible {
                return Err(EngineError::validation(
                    "member is not active and eligible",
                ));
            }

            tx.execute(
                "INSERT INTO nominations
                     (election_id, member_id, bio, profile_photo_url, status, applied_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    election_id.0,
                    member_id.0,
                    profile.bio,
                    profile.profile_photo_url,
                    ReviewStatus::Pending.as_str(),
                    fmt_datetime(now),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    EngineError::conflict(
                        "member already has a live nomination for this election",
                    )
                } else {
                    StoreError::storage("apply_nomination", e.to_string()).into()
                }
            })?;
            let nomination_id = NominationId(tx.last_insert_rowid());

            tx.commit()
                .map_err(|e| StoreError::storage("apply_nomination", e.to_string()))?;

            Ok(Nomination {
                nomination_id,
                election_id,
                member_id,
                candidate_id: None,
                profile,
                status: ReviewStatus::Pending,
                rejection_reason: None,
                approval_notes: None,
                reviewed_by: None,
                reviewed_at: None,
                applied_at: now,
            })
        })
        .await
    }

    /// Approve a pending nomination, creating its candidate.
    ///
    /// The nomination flip and the candidate insert commit together;
    /// a crash in between leaves the nomination pending and retryable.
    pub async fn approve_nomination(
        &self,
        nomination_id: NominationId,
        admin_id: AdminId,
        notes: Option<String>,
        now: NaiveDateTime,
    ) -> Result<CandidateId, EngineError> {
        self.call("approve_nomination", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("approve_nomination", e.to_string()))?;

            let nomination = tx
                .query_row(
                    &format!("{} WHERE nomination_id = ?1", SELECT_NOMINATION),
                    params![nomination_id.0],
                    nomination_from_row,
                )
                .optional()
                .map_err(|e| StoreError::storage("approve_nomination", e.to_string()))?
                .ok_or(EngineError::NotFound("nomination"))?;

            if nomination.status != ReviewStatus::Pending {
                return Err(EngineError::invalid_state(format!(
                    "nomination already reviewed ({})",
                    nomination.status
                )));
            }

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT candidate_id FROM candidates
                     WHERE election_id = ?1 AND member_id = ?2 AND status != ?3",
                    params![
                        nomination.election_id.0,
                        nomination.member_id.0,
                        ReviewStatus::Rejected.as_str()
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("approve_nomination", e.to_string()))?;
            if existing.is_some() {
                return Err(EngineError::conflict(
                    "member already has a live candidacy in this election",
                ));
            }

            tx.execute(
                "INSERT INTO candidates
                     (election_id, member_id, status, vote_count, is_winner, nominated_at)
                 VALUES (?1, ?2, ?3, 0, 0, ?4)",
                params![
                    nomination.election_id.0,
                    nomination.member_id.0,
                    ReviewStatus::Approved.as_str(),
                    fmt_datetime(now),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    EngineError::conflict(
                        "member already has a live candidacy in this election",
                    )
                } else {
                    StoreError::storage("approve_nomination", e.to_string()).into()
                }
            })?;
            let candidate_id = CandidateId(tx.last_insert_rowid());

            // Revalidate PENDING at write time; zero rows means another
            // reviewer decided this nomination since our read.
            let changed = tx
                .execute(
                    "UPDATE nominations
                     SET status = ?2, candidate_id = ?3, approval_notes = ?4,
                         reviewed_by = ?5, reviewed_at = ?6
                     WHERE nomination_id = ?1 AND status = ?7",
                    params![
                        nomination_id.0,
                        ReviewStatus::Approved.as_str(),
                        candidate_id.0,
                        notes,
                        admin_id.0,
                        fmt_datetime(now),
                        ReviewStatus::Pending.as_str(),
                    ],
                )
                .map_err(|e| StoreError::storage("approve_nomination", e.to_string()))?;
            if changed == 0 {
                return Err(EngineError::conflict(
                    "nomination was reviewed concurrently",
                ));
            }

            tx.commit()
                .map_err(|e| StoreError::storage("approve_nomination", e.to_string()))?;
            Ok(candidate_id)
        })
        .await
    }

    /// Reject a pending nomination. No candidate is created. The reason
    /// is validated by the caller.
    pub async fn reject_nomination(
        &self,
        nomination_id: NominationId,
        admin_id: AdminId,
        reason: String,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        self.call("reject_nomination", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("reject_nomination", e.to_string()))?;

            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM nominations WHERE nomination_id = ?1",
                    params![nomination_id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("reject_nomination", e.to_string()))?;
            let status = parse_review_status(
                &status.ok_or(EngineError::NotFound("nomination"))?,
            )
            .map_err(|e| StoreError::storage("reject_nomination", e.to_string()))?;
            if status != ReviewStatus::Pending {
                return Err(EngineError::invalid_state(format!(
                    "nomination already reviewed ({})",
                    status
                )));
            }

            let changed = tx
                .execute(
                    "UPDATE nominations
                     SET status = ?2, rejection_reason = ?3,
                         reviewed_by = ?4, reviewed_at = ?5
                     WHERE nomination_id = ?1 AND status = ?6",
                    params![
                        nomination_id.0,
                        ReviewStatus::Rejected.as_str(),
                        reason,
                        admin_id.0,
                        fmt_datetime(now),
                        ReviewStatus::Pending.as_str(),
                    ],
                )
                .map_err(|e| StoreError::storage("reject_nomination", e.to_string()))?;
            if changed == 0 {
                return Err(EngineError::conflict(
                    "nomination was reviewed concurrently",
                ));
            }

            tx.commit()
                .map_err(|e| StoreError::storage("reject_nomination", e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// All candidates of one election, highest vote count first.
    pub async fn candidates_for_election(
        &self,
        election_id: ElectionId,
    ) -> Result<Vec<Candidate>, EngineError> {
        self.call("candidates_for_election", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT candidate_id, election_id, member_id, status,
                            vote_count, is_winner, nominated_at
                     FROM candidates WHERE election_id = ?1
                     ORDER BY vote_count DESC, candidate_id",
                )
                .map_err(|e| StoreError::storage("candidates_for_election", e.to_string()))?;
            let rows = stmt
                .query_map(params![election_id.0], |row| {
                    Ok(Candidate {
                        candidate_id: CandidateId(row.get(0)?),
                        election_id: ElectionId(row.get(1)?),
                        member_id: MemberId(row.get(2)?),
                        status: parse_review_status(&row.get::<_, String>(3)?)?,
                        vote_count: row.get::<_, i64>(4)?.max(0) as u64,
                        is_winner: row.get(5)?,
                        nominated_at: super::parse_datetime(
                            &row.get::<_, String>(6)?,
                            "nominated_at",
                        )?,
                    })
                })
                .map_err(|e| StoreError::storage("candidates_for_election", e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::storage("candidates_for_election", e.to_string()).into())
        })
        .await
    }
}
