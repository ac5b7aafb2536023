//! Data model for the bulk registration import pipeline

mod bulk_job;
mod import_session;

pub use bulk_job::{BulkJob, JobCounts, JobStatus};
pub use import_session::{
    GroupCandidate, ImportRow, ImportSession, ParsedCandidate, RowOutcome, RowValidation,
    SessionStatus,
};
