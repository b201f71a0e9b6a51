//! Domain types for the election lifecycle engine.
//!
//! Statuses are closed enums rather than free-form strings so that
//! illegal states are unrepresentable and transitions can be checked
//! exhaustively.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::Serialize;

/// Newtype for an election event (one assembly-wide electoral cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EventId(pub i64);

/// Newtype for a single ward-scoped ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ElectionId(pub i64);

/// Newtype for a ward. The geographic hierarchy itself lives outside
/// this service; we only carry the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WardId(pub i64);

/// Newtype for an assembly (the admin scope an event belongs to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AssemblyId(pub i64);

/// Newtype for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MemberId(pub i64);

/// Newtype for an admin. Identity is verified upstream; this is an
/// opaque actor id recorded on review decisions and publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AdminId(pub i64);

/// Newtype for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CandidateId(pub i64);

/// Newtype for a nomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NominationId(pub i64);

macro_rules! impl_id_display {
    ($($id:ident),+) => {
        $(
            impl fmt::Display for $id {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<i64> for $id {
                fn from(v: i64) -> Self {
                    Self(v)
                }
            }
        )+
    };
}

impl_id_display!(
    EventId,
    ElectionId,
    WardId,
    AssemblyId,
    MemberId,
    AdminId,
    CandidateId,
    NominationId
);

/// Lifecycle status of an election.
///
/// `Draft` is only left via the creation-time transition to `Scheduled`;
/// every later transition is driven by the event's time boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElectionStatus {
    Draft,
    Scheduled,
    NominationOpen,
    ReadyForPoll,
    Active,
    Completed,
}

impl ElectionStatus {
    /// The canonical string persisted in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Scheduled => "SCHEDULED",
            Self::NominationOpen => "NOMINATION_OPEN",
            Self::ReadyForPoll => "READY_FOR_POLL",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for ElectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "SCHEDULED" => Ok(Self::Scheduled),
            "NOMINATION_OPEN" => Ok(Self::NominationOpen),
            "READY_FOR_POLL" => Ok(Self::ReadyForPoll),
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(format!("unknown election status '{}'", other)),
        }
    }
}

/// Review status shared by nominations and candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown review status '{}'", other)),
        }
    }
}

/// The four ordered instants that bound one electoral cycle.
///
/// All instants are naive local datetimes in the deployment's fixed
/// timezone; no offset is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindows {
    pub nomination_start: NaiveDateTime,
    pub nomination_end: NaiveDateTime,
    pub voting_start: NaiveDateTime,
    pub voting_end: NaiveDateTime,
}

impl EventWindows {
    /// Checks the boundary ordering invariant:
    /// `nomination_start < nomination_end <= voting_start < voting_end`.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.nomination_start < self.nomination_end) {
            return Err("nomination_start must be before nomination_end".to_string());
        }
        if !(self.nomination_end <= self.voting_start) {
            return Err("nomination_end must not be after voting_start".to_string());
        }
        if !(self.voting_start < self.voting_end) {
            return Err("voting_start must be before voting_end".to_string());
        }
        Ok(())
    }
}

/// One assembly-wide electoral cycle. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectionEvent {
    pub event_id: EventId,
    pub assembly_id: AssemblyId,
    pub title: String,
    pub windows: EventWindows,
    pub created_at: NaiveDateTime,
}

/// One ballot scoped to a ward.
#[derive(Debug, Clone, PartialEq)]
pub struct Election {
    pub election_id: ElectionId,
    pub event_id: EventId,
    pub ward_id: WardId,
    pub admin_id: AdminId,
    pub title: String,
    pub status: ElectionStatus,
    pub total_votes: u64,
    pub result_calculated: bool,
    pub winner_percentage: f64,
    pub result_published: bool,
    pub result_published_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// A member's standing in one election. `vote_count` and `is_winner`
/// are derived; only the tally rewrites them.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub candidate_id: CandidateId,
    pub election_id: ElectionId,
    pub member_id: MemberId,
    pub status: ReviewStatus,
    pub vote_count: u64,
    pub is_winner: bool,
    pub nominated_at: NaiveDateTime,
}

/// Free-form profile a member attaches to their application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NominationProfile {
    pub bio: Option<String>,
    pub profile_photo_url: Option<String>,
}

/// A member's application to stand in an election, plus the review
/// decision. Once the status leaves `Pending` the record is immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct Nomination {
    pub nomination_id: NominationId,
    pub election_id: ElectionId,
    pub member_id: MemberId,
    pub candidate_id: Option<CandidateId>,
    pub profile: NominationProfile,
    pub status: ReviewStatus,
    pub rejection_reason: Option<String>,
    pub approval_notes: Option<String>,
    pub reviewed_by: Option<AdminId>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub applied_at: NaiveDateTime,
}

/// Kind of a notification emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationKind {
    Announcement,
    Nomination,
    Reminder,
    Result,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Announcement => "ANNOUNCEMENT",
            Self::Nomination => "NOMINATION",
            Self::Reminder => "REMINDER",
            Self::Result => "RESULT",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANNOUNCEMENT" => Ok(Self::Announcement),
            "NOMINATION" => Ok(Self::Nomination),
            "REMINDER" => Ok(Self::Reminder),
            "RESULT" => Ok(Self::Result),
            other => Err(format!("unknown notification kind '{}'", other)),
        }
    }
}

/// A notification to be dispatched to the outside world.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationMessage {
    pub kind: NotificationKind,
    pub election_id: Option<ElectionId>,
    pub assembly_id: Option<AssemblyId>,
    pub admin_id: Option<AdminId>,
    pub title: String,
    pub message: String,
}

/// Outcome of a tally request.
///
/// `AlreadyCalculated` is a success: the guard fired and the persisted
/// result is authoritative. Callers that raced each other both get a
/// truthful answer.
#[derive(Debug, Clone, PartialEq)]
pub enum TallyOutcome {
    Calculated(TallySummary),
    AlreadyCalculated,
}

/// Per-election result of a completed tally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TallySummary {
    pub election_id: ElectionId,
    pub total_votes: u64,
    pub max_votes: u64,
    pub winners: Vec<CandidateId>,
    pub winner_percentage: f64,
}
