//! Core pipeline services: parse → validate → execute → report

pub mod job_executor;
pub mod row_parser;
pub mod row_validator;
pub mod status_reporter;

pub use job_executor::JobExecutor;
pub use row_validator::ReferenceData;
