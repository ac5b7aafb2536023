//! Import session state machine
//!
//! A session moves through PREVIEWING → CONFIRMED → PROCESSING → COMPLETED/FAILED.
//! Session-level status is distinct from per-row validation verdicts and
//! per-row execution outcomes.

use bulkreg_common::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Session-level lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Parsed and validated, awaiting user review
    Previewing,
    /// User confirmed; a job exists but has not started running
    Confirmed,
    /// Job executor is working through the rows
    Processing,
    /// Every eligible row has an outcome (success or failure)
    Completed,
    /// Executor-level catastrophic failure
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Previewing => "PREVIEWING",
            SessionStatus::Confirmed => "CONFIRMED",
            SessionStatus::Processing => "PROCESSING",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PREVIEWING" => Ok(SessionStatus::Previewing),
            "CONFIRMED" => Ok(SessionStatus::Confirmed),
            "PROCESSING" => Ok(SessionStatus::Processing),
            "COMPLETED" => Ok(SessionStatus::Completed),
            "FAILED" => Ok(SessionStatus::Failed),
            other => Err(Error::Internal(format!("Unknown session status: {}", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Pre-execution validation verdict for one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowValidation {
    /// Eligible for execution as-is
    Ready,
    /// Recoverable via an override (ambiguous/unknown group, in-file duplicate)
    NeedsReview,
    /// Unrecoverable without re-uploading corrected source data
    Invalid,
}

impl RowValidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowValidation::Ready => "READY",
            RowValidation::NeedsReview => "NEEDS_REVIEW",
            RowValidation::Invalid => "INVALID",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "READY" => Ok(RowValidation::Ready),
            "NEEDS_REVIEW" => Ok(RowValidation::NeedsReview),
            "INVALID" => Ok(RowValidation::Invalid),
            other => Err(Error::Internal(format!("Unknown row validation: {}", other))),
        }
    }
}

/// Post-execution result for one row, set exactly once by the job executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowOutcome {
    /// Not yet attempted
    Pending,
    /// Registration created
    Success,
    /// Creation failed (reason recorded on the row)
    Failed,
    /// Never eligible: INVALID or unresolved NEEDS_REVIEW at confirm time
    Skipped,
}

impl RowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOutcome::Pending => "PENDING",
            RowOutcome::Success => "SUCCESS",
            RowOutcome::Failed => "FAILED",
            RowOutcome::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(RowOutcome::Pending),
            "SUCCESS" => Ok(RowOutcome::Success),
            "FAILED" => Ok(RowOutcome::Failed),
            "SKIPPED" => Ok(RowOutcome::Skipped),
            other => Err(Error::Internal(format!("Unknown row outcome: {}", other))),
        }
    }
}

/// Normalized candidate fields extracted by the row parser.
///
/// All fields are optional: presence checks are the validator's job,
/// not the parser's.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedCandidate {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub country_code: Option<String>,
    pub program_code: Option<String>,
    pub group_name: Option<String>,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
}

impl ParsedCandidate {
    /// A row with no name, email, or mobile at all is unparseable
    pub fn has_identity(&self) -> bool {
        self.full_name.is_some() || self.email.is_some() || self.mobile.is_some()
    }
}

/// A fuzzy group-name match offered to the user for override selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCandidate {
    pub group_id: i64,
    pub name: String,
    /// Similarity score, 0-100
    pub score: u8,
}

/// One row of an import session, 1:1 with a data row of the uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRow {
    /// 1-based position in the original file
    pub row_index: i64,

    /// Original column header → raw cell value, preserved verbatim
    pub raw_data: BTreeMap<String, String>,

    /// Normalized fields, or None if the row carried no usable data
    pub parsed: Option<ParsedCandidate>,

    pub validation_status: RowValidation,

    /// Human-readable reason when not READY; references the offending value
    pub validation_message: Option<String>,

    /// Program resolved during validation
    pub program_id: Option<i64>,

    /// Group resolved by exact match during validation
    pub matched_group_id: Option<i64>,

    /// Fuzzy candidates offered when the group match was ambiguous
    pub group_candidates: Vec<GroupCandidate>,

    /// User supplied a correction during review
    pub overridden: bool,

    /// Group chosen by the user's override
    pub override_group_id: Option<i64>,

    pub outcome: RowOutcome,

    /// Failure reason when outcome is FAILED
    pub outcome_error: Option<String>,
}

impl ImportRow {
    /// Row whose cells held no recognizable candidate data
    pub fn unparsed(row_index: i64, raw_data: BTreeMap<String, String>, message: String) -> Self {
        Self {
            row_index,
            raw_data,
            parsed: None,
            validation_status: RowValidation::Invalid,
            validation_message: Some(message),
            program_id: None,
            matched_group_id: None,
            group_candidates: Vec::new(),
            overridden: false,
            override_group_id: None,
            outcome: RowOutcome::Pending,
            outcome_error: None,
        }
    }

    /// Row with extracted fields, verdict provisional until validation runs
    pub fn parsed(row_index: i64, raw_data: BTreeMap<String, String>, candidate: ParsedCandidate) -> Self {
        Self {
            row_index,
            raw_data,
            parsed: Some(candidate),
            validation_status: RowValidation::Ready,
            validation_message: None,
            program_id: None,
            matched_group_id: None,
            group_candidates: Vec::new(),
            overridden: false,
            override_group_id: None,
            outcome: RowOutcome::Pending,
            outcome_error: None,
        }
    }

    /// Eligible for execution: READY, or NEEDS_REVIEW resolved by an override.
    /// INVALID rows are never eligible regardless of overrides.
    pub fn is_eligible(&self) -> bool {
        match self.validation_status {
            RowValidation::Ready => true,
            RowValidation::NeedsReview => self.overridden,
            RowValidation::Invalid => false,
        }
    }

    /// Group the executor should register this row under
    pub fn effective_group_id(&self) -> Option<i64> {
        self.override_group_id.or(self.matched_group_id)
    }
}

/// Import session header (rows stored separately, ordered by `row_index`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSession {
    pub import_id: Uuid,

    /// Tenant isolation boundary: all lookups are scoped to this owner
    pub owner_id: i64,

    pub status: SessionStatus,

    pub filename: Option<String>,

    pub total_rows: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub skipped_count: i64,

    /// Rows attempted so far (success + failed)
    pub processed_count: i64,

    /// Free-form status string for UI display
    pub progress_text: String,

    pub created_at: DateTime<Utc>,

    /// Unconfirmed sessions past this instant are garbage collected
    pub expires_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportSession {
    pub fn new(owner_id: i64, filename: Option<String>, total_rows: i64, ttl_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            import_id: Uuid::new_v4(),
            owner_id,
            status: SessionStatus::Previewing,
            filename,
            total_rows,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            processed_count: 0,
            progress_text: String::from("Awaiting review"),
            created_at: now,
            expires_at: now + Duration::minutes(ttl_minutes),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Previewing && now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            SessionStatus::Previewing,
            SessionStatus::Confirmed,
            SessionStatus::Processing,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SessionStatus::parse("DRAFT").is_err());
    }

    #[test]
    fn eligibility_rules() {
        let mut row = ImportRow::parsed(1, BTreeMap::new(), ParsedCandidate::default());
        assert!(row.is_eligible());

        row.validation_status = RowValidation::NeedsReview;
        assert!(!row.is_eligible());

        row.overridden = true;
        row.override_group_id = Some(7);
        assert!(row.is_eligible());
        assert_eq!(row.effective_group_id(), Some(7));

        row.validation_status = RowValidation::Invalid;
        assert!(!row.is_eligible(), "INVALID is never eligible, even overridden");
    }

    #[test]
    fn expiry_applies_only_to_unconfirmed_sessions() {
        let mut session = ImportSession::new(1, None, 3, -1); // already past expiry
        assert!(session.is_expired(Utc::now()));

        session.status = SessionStatus::Confirmed;
        assert!(!session.is_expired(Utc::now()));
    }
}
