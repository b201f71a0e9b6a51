//! Event scheduling, bulk status transitions, and result publication.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

use super::{
    election_from_row, fmt_datetime, is_constraint_violation, SqliteStore, StatusAdvance,
    StoreError, SELECT_ELECTION,
};
use crate::error::EngineError;
use crate::model::{
    AdminId, AssemblyId, Election, ElectionId, ElectionStatus, EventId, EventWindows,
    NotificationKind, NotificationMessage, WardId,
};

/// The four boundary-driven transitions of the lifecycle, in timeline
/// order. Each row is (condition SQL over the parent event, target
/// status). `DRAFT` elections are never touched; leaving `DRAFT` is a
/// creation-time transition.
const STATUS_TRANSITIONS: [(&str, ElectionStatus); 4] = [
    (
        "nomination_start <= ?1 AND nomination_end > ?1",
        ElectionStatus::NominationOpen,
    ),
    (
        "nomination_end <= ?1 AND voting_start > ?1",
        ElectionStatus::ReadyForPoll,
    ),
    (
        "voting_start <= ?1 AND voting_end > ?1",
        ElectionStatus::Active,
    ),
    ("voting_end <= ?1", ElectionStatus::Completed),
];

impl SqliteStore {
    /// Create an election event and one `SCHEDULED` election per ward,
    /// atomically. Boundary ordering is validated by the caller.
    pub async fn schedule_event(
        &self,
        assembly_id: AssemblyId,
        admin_id: AdminId,
        title: String,
        windows: EventWindows,
        ward_ids: Vec<WardId>,
        now: NaiveDateTime,
    ) -> Result<(EventId, Vec<ElectionId>), EngineError> {
        self.call("schedule_event", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("schedule_event", e.to_string()))?;

            tx.execute(
                "INSERT INTO election_events
                     (assembly_id, title, nomination_start, nomination_end,
                      voting_start, voting_end, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    assembly_id.0,
                    title,
                    fmt_datetime(windows.nomination_start),
                    fmt_datetime(windows.nomination_end),
                    fmt_datetime(windows.voting_start),
                    fmt_datetime(windows.voting_end),
                    fmt_datetime(now),
                ],
            )
            .map_err(|e| StoreError::storage("schedule_event", e.to_string()))?;
            let event_id = EventId(tx.last_insert_rowid());

            let mut election_ids = Vec::with_capacity(ward_ids.len());
            for ward_id in &ward_ids {
                tx.execute(
                    "INSERT INTO elections
                         (event_id, ward_id, admin_id, title, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        event_id.0,
                        ward_id.0,
                        admin_id.0,
                        title,
                        ElectionStatus::Scheduled.as_str(),
                        fmt_datetime(now),
                    ],
                )
                .map_err(|e| StoreError::storage("schedule_event", e.to_string()))?;
                election_ids.push(ElectionId(tx.last_insert_rowid()));
            }

            tx.commit()
                .map_err(|e| StoreError::storage("schedule_event", e.to_string()))?;
            Ok((event_id, election_ids))
        })
        .await
    }

    /// Advance every non-`DRAFT` election to the status its event
    /// boundaries dictate at `now`.
    ///
    /// Four set-based conditional updates in one transaction. Each
    /// update also excludes rows already in the target status, so the
    /// returned counts are real changes and re-running at the same
    /// instant is a no-op.
    pub async fn advance_all_statuses(
        &self,
        now: NaiveDateTime,
    ) -> Result<StatusAdvance, EngineError> {
        self.call("advance_all_statuses", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("advance_all_statuses", e.to_string()))?;

            let now_text = fmt_datetime(now);
            let mut advance = StatusAdvance::default();

            for (condition, target) in STATUS_TRANSITIONS {
                let sql = format!(
                    "UPDATE elections SET status = ?2
                     WHERE status NOT IN ('{draft}', ?2)
                       AND event_id IN (
                           SELECT event_id FROM election_events WHERE {condition}
                       )",
                    draft = ElectionStatus::Draft.as_str(),
                    condition = condition,
                );
                let changed = tx
                    .execute(&sql, params![now_text, target.as_str()])
                    .map_err(|e| StoreError::storage("advance_all_statuses", e.to_string()))?;

                match target {
                    ElectionStatus::NominationOpen => advance.nomination_open = changed,
                    ElectionStatus::ReadyForPoll => advance.ready_for_poll = changed,
                    ElectionStatus::Active => advance.active = changed,
                    ElectionStatus::Completed => advance.completed = changed,
                    _ => {}
                }
            }

            tx.commit()
                .map_err(|e| StoreError::storage("advance_all_statuses", e.to_string()))?;
            Ok(advance)
        })
        .await
    }

    /// Mark a calculated result as published and record the result
    /// notification in the same transaction. External dispatch happens
    /// after commit and is best-effort.
    pub async fn publish_result(
        &self,
        election_id: ElectionId,
        admin_id: AdminId,
        now: NaiveDateTime,
    ) -> Result<(NaiveDateTime, NotificationMessage), EngineError> {
        self.call("publish_result", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("publish_result", e.to_string()))?;

            let election = tx
                .query_row(
                    &format!("{} WHERE election_id = ?1", SELECT_ELECTION),
                    params![election_id.0],
                    election_from_row,
                )
                .optional()
                .map_err(|e| StoreError::storage("publish_result", e.to_string()))?
                .ok_or(EngineError::NotFound("election"))?;

            if election.admin_id != admin_id {
                return Err(EngineError::unauthorized(
                    "only the owning admin may publish this election",
                ));
            }
            if election.status != ElectionStatus::Completed {
                return Err(EngineError::invalid_state(format!(
                    "election is {}; only COMPLETED results can be published",
                    election.status
                )));
            }
            if !election.result_calculated {
                return Err(EngineError::invalid_state(
                    "result has not been calculated yet",
                ));
            }
            if election.result_published {
                return Err(EngineError::invalid_state("result is already published"));
            }

            // Revalidate at write time: a concurrent publish may have
            // won between the read above and this update.
            let changed = tx
                .execute(
                    "UPDATE elections
                     SET result_published = 1, result_published_at = ?2
                     WHERE election_id = ?1 AND result_published = 0",
                    params![election_id.0, fmt_datetime(now)],
                )
                .map_err(|e| StoreError::storage("publish_result", e.to_string()))?;
            if changed == 0 {
                return Err(EngineError::conflict("result was published concurrently"));
            }

            let notification = NotificationMessage {
                kind: NotificationKind::Result,
                election_id: Some(election_id),
                assembly_id: None,
                admin_id: Some(admin_id),
                title: "Election result published".to_string(),
                message: format!("Results for '{}' are now live.", election.title),
            };
            insert_notification(&tx, &notification, now)?;

            tx.commit()
                .map_err(|e| StoreError::storage("publish_result", e.to_string()))?;
            Ok((now, notification))
        })
        .await
    }

    /// Inverse of [`publish_result`]: clears the publication flag and
    /// deletes the stored result notifications for the election.
    /// Returns the deleted notifications so the caller can retract any
    /// external announcements.
    ///
    /// [`publish_result`]: SqliteStore::publish_result
    pub async fn unpublish_result(
        &self,
        election_id: ElectionId,
        admin_id: AdminId,
    ) -> Result<Vec<NotificationMessage>, EngineError> {
        self.call("unpublish_result", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("unpublish_result", e.to_string()))?;

            let election = tx
                .query_row(
                    &format!("{} WHERE election_id = ?1", SELECT_ELECTION),
                    params![election_id.0],
                    election_from_row,
                )
                .optional()
                .map_err(|e| StoreError::storage("unpublish_result", e.to_string()))?
                .ok_or(EngineError::NotFound("election"))?;

            if election.admin_id != admin_id {
                return Err(EngineError::unauthorized(
                    "only the owning admin may unpublish this election",
                ));
            }
            if !election.result_published {
                return Err(EngineError::invalid_state("result is not published"));
            }

            let changed = tx
                .execute(
                    "UPDATE elections
                     SET result_published = 0, result_published_at = NULL
                     WHERE election_id = ?1 AND result_published = 1",
                    params![election_id.0],
                )
                .map_err(|e| StoreError::storage("unpublish_result", e.to_string()))?;
            if changed == 0 {
                return Err(EngineError::conflict(
                    "result was unpublished concurrently",
                ));
            }

            let retracted = {
                let mut stmt = tx
                    .prepare(
                        "DELETE FROM notifications
                         WHERE election_id = ?1 AND kind = ?2
                         RETURNING admin_id, assembly_id, title, message",
                    )
                    .map_err(|e| StoreError::storage("unpublish_result", e.to_string()))?;
                let rows = stmt
                    .query_map(
                        params![election_id.0, NotificationKind::Result.as_str()],
                        |row| {
                            Ok(NotificationMessage {
                                kind: NotificationKind::Result,
                                election_id: Some(election_id),
                                assembly_id: row.get::<_, Option<i64>>(1)?.map(AssemblyId),
                                admin_id: row.get::<_, Option<i64>>(0)?.map(AdminId),
                                title: row.get(2)?,
                                message: row.get(3)?,
                            })
                        },
                    )
                    .map_err(|e| StoreError::storage("unpublish_result", e.to_string()))?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(|e| StoreError::storage("unpublish_result", e.to_string()))?
            };

            tx.commit()
                .map_err(|e| StoreError::storage("unpublish_result", e.to_string()))?;
            Ok(retracted)
        })
        .await
    }

    pub async fn elections_for_event(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Election>, EngineError> {
        self.call("elections_for_event", move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE event_id = ?1 ORDER BY election_id",
                    SELECT_ELECTION
                ))
                .map_err(|e| StoreError::storage("elections_for_event", e.to_string()))?;
            let rows = stmt
                .query_map(params![event_id.0], election_from_row)
                .map_err(|e| StoreError::storage("elections_for_event", e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::storage("elections_for_event", e.to_string()).into())
        })
        .await
    }

    /// Stored notifications for one election, oldest first.
    pub async fn notifications_for_election(
        &self,
        election_id: ElectionId,
    ) -> Result<Vec<NotificationMessage>, EngineError> {
        self.call("notifications_for_election", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT kind, election_id, assembly_id, admin_id, title, message
                     FROM notifications WHERE election_id = ?1
                     ORDER BY notification_id",
                )
                .map_err(|e| StoreError::storage("notifications_for_election", e.to_string()))?;
            let rows = stmt
                .query_map(params![election_id.0], |row| {
                    let kind: String = row.get(0)?;
                    Ok(NotificationMessage {
                        kind: kind.parse().map_err(|_| {
                            rusqlite::Error::FromSqlConversionFailure(
                                0,
                                rusqlite::types::Type::Text,
                                Box::new(StoreError::corruption("notification kind")),
                            )
                        })?,
                        election_id: row.get::<_, Option<i64>>(1)?.map(ElectionId),
                        assembly_id: row.get::<_, Option<i64>>(2)?.map(AssemblyId),
                        admin_id: row.get::<_, Option<i64>>(3)?.map(AdminId),
                        title: row.get(4)?,
                        message: row.get(5)?,
                    })
                })
                .map_err(|e| StoreError::storage("notifications_for_election", e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::storage("notifications_for_election", e.to_string()).into())
        })
        .await
    }
}

pub(super) fn insert_notification(
    tx: &rusqlite::Transaction<'_>,
    n: &NotificationMessage,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    tx.execute(
        "INSERT INTO notifications
             (admin_id, election_id, assembly_id, kind, title, message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            n.admin_id.map(|a| a.0),
            n.election_id.map(|e| e.0),
            n.assembly_id.map(|a| a.0),
            n.kind.as_str(),
            n.title,
            n.message,
            fmt_datetime(now),
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            EngineError::conflict("notification already recorded")
        } else {
            StoreError::storage("insert_notification", e.to_string()).into()
        }
    })?;
    Ok(())
}
