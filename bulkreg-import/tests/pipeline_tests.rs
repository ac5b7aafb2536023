//! End-to-end pipeline scenarios exercised at the library level:
//! parse → validate → persist → confirm → execute → report.

use sqlx::SqlitePool;
use uuid::Uuid;

use bulkreg_import::db::sessions::{self, ConfirmOutcome};
use bulkreg_import::db::{catalog, registrations, rows};
use bulkreg_import::models::{
    ImportRow, ImportSession, JobStatus, RowOutcome, RowValidation, SessionStatus,
};
use bulkreg_import::services::{row_parser, row_validator, JobExecutor, ReferenceData};

async fn test_pool() -> SqlitePool {
    // One connection only: every `sqlite::memory:` connection is its own DB
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");

    bulkreg_import::db::init_tables(&pool).await.expect("schema");
    catalog::ensure_default_programs(&pool).await.expect("programs");
    catalog::create_group(&pool, 1, "Engineering")
        .await
        .expect("group");
    catalog::create_group(&pool, 1, "Sales").await.expect("group");
    pool
}

/// Parse+validate a CSV and persist it as a PREVIEWING session for owner 1
async fn stage_session(pool: &SqlitePool, csv: &str, ttl_minutes: i64) -> (Uuid, Vec<ImportRow>) {
    let mut parsed = row_parser::parse(csv.as_bytes()).expect("parse");
    let refs = ReferenceData::load(pool, 1).await.expect("refs");
    row_validator::validate_rows(&mut parsed, &refs);

    let session = ImportSession::new(1, Some("roster.csv".into()), parsed.len() as i64, ttl_minutes);
    sessions::create_session(pool, &session, &parsed)
        .await
        .expect("create session");
    (session.import_id, parsed)
}

async fn confirm_and_run(pool: &SqlitePool, import_id: Uuid) {
    let outcome = sessions::confirm_session(pool, import_id, 1)
        .await
        .expect("confirm");
    assert!(matches!(outcome, ConfirmOutcome::Started(_)));

    JobExecutor::new(pool.clone(), 0)
        .run(import_id, 1)
        .await
        .expect("run job");
}

#[tokio::test]
async fn full_success_run() {
    let pool = test_pool().await;

    let mut csv = String::from("Full Name,Email,Mobile,Program,Group\n");
    for i in 0..10 {
        csv.push_str(&format!(
            "Person {i},person{i}@example.com,98765432{i:02},EMPLOYEE,Engineering\n"
        ));
    }

    let (import_id, parsed) = stage_session(&pool, &csv, 30).await;
    assert!(parsed.iter().all(|r| r.validation_status == RowValidation::Ready));

    confirm_and_run(&pool, import_id).await;

    let session = sessions::load_session(&pool, import_id, 1)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.success_count, 10);
    assert_eq!(session.failed_count, 0);
    assert_eq!(session.skipped_count, 0);
    assert!(session.completed_at.is_some());

    assert_eq!(registrations::count_registrations(&pool, 1).await.unwrap(), 10);
}

#[tokio::test]
async fn invalid_rows_are_skipped_not_executed() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n\
               Bob Jones,broken-email,9876543211,EMPLOYEE,Engineering\n\
               Carol White,carol@example.com,9876543212,EMPLOYEE,Sales\n";

    let (import_id, _) = stage_session(&pool, csv, 30).await;
    confirm_and_run(&pool, import_id).await;

    let session = sessions::load_session(&pool, import_id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.success_count, 2);
    assert_eq!(session.failed_count, 0);
    assert_eq!(session.skipped_count, 1);
    // Counter invariant at completion
    assert_eq!(
        session.success_count + session.failed_count + session.skipped_count,
        session.total_rows
    );

    let all_rows = rows::load_rows(&pool, import_id).await.unwrap();
    assert_eq!(all_rows[1].outcome, RowOutcome::Skipped);
    assert_eq!(registrations::count_registrations(&pool, 1).await.unwrap(), 2);
}

#[tokio::test]
async fn duplicate_rows_flagged_for_review() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n\
               Alice Clone,ALICE@example.com,9876543210,EMPLOYEE,Sales\n";

    let (_, parsed) = stage_session(&pool, csv, 30).await;

    // Email comparison is case-insensitive; both members of the pair are
    // held for review, not just the later one
    assert_eq!(parsed[0].validation_status, RowValidation::NeedsReview);
    assert_eq!(parsed[1].validation_status, RowValidation::NeedsReview);
    assert!(parsed[0]
        .validation_message
        .as_deref()
        .unwrap()
        .contains("Duplicate"));
}

#[tokio::test]
async fn override_resolves_ambiguous_group() {
    let pool = test_pool().await;

    // "Enginering" is one edit away from "Engineering": fuzzy candidates
    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Enginering\n";

    let (import_id, parsed) = stage_session(&pool, csv, 30).await;
    assert_eq!(parsed[0].validation_status, RowValidation::NeedsReview);
    let candidate = &parsed[0].group_candidates[0];
    assert_eq!(candidate.name, "Engineering");

    // Without an override the only row is ineligible
    let err = sessions::confirm_session(&pool, import_id, 1).await;
    assert!(err.is_err());

    sessions::apply_overrides(&pool, import_id, 1, &[(1, candidate.group_id)])
        .await
        .expect("override");

    confirm_and_run(&pool, import_id).await;

    let session = sessions::load_session(&pool, import_id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.success_count, 1);
    assert_eq!(session.skipped_count, 0);

    let all_rows = rows::load_rows(&pool, import_id).await.unwrap();
    assert_eq!(all_rows[0].outcome, RowOutcome::Success);
    assert_eq!(all_rows[0].override_group_id, Some(candidate.group_id));
}

#[tokio::test]
async fn override_must_reference_existing_group() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Enginering\n";

    let (import_id, _) = stage_session(&pool, csv, 30).await;

    let result = sessions::apply_overrides(&pool, import_id, 1, &[(1, 99999)]).await;
    assert!(matches!(result, Err(bulkreg_common::Error::InvalidInput(_))));
}

#[tokio::test]
async fn row_failure_is_isolated() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n\
               Bob Jones,bob@example.com,9876543211,EMPLOYEE,Engineering\n";

    let (import_id, _) = stage_session(&pool, csv, 30).await;

    // Alice already exists for this owner, so her row will hit the
    // unique constraint at execution time
    let program = catalog::list_programs(&pool).await.unwrap().remove(0);
    let group = catalog::list_groups(&pool, 1).await.unwrap().remove(0);
    registrations::create_registration(
        &pool,
        &registrations::NewRegistration {
            owner_id: 1,
            full_name: "Alice Smith".into(),
            email: "alice@example.com".into(),
            country_code: "+91".into(),
            mobile: "9876543210".into(),
            program_id: program.program_id,
            group_id: group.group_id,
            window_start: None,
            window_end: None,
        },
    )
    .await
    .expect("seed existing registration");

    confirm_and_run(&pool, import_id).await;

    let session = sessions::load_session(&pool, import_id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.success_count, 1);
    assert_eq!(session.failed_count, 1);

    let all_rows = rows::load_rows(&pool, import_id).await.unwrap();
    assert_eq!(all_rows[0].outcome, RowOutcome::Failed);
    assert!(all_rows[0].outcome_error.is_some());
    assert_eq!(all_rows[1].outcome, RowOutcome::Success);
}

#[tokio::test]
async fn error_report_includes_rows_skipped_over_unresolved_review() {
    let pool = test_pool().await;

    // "Enginering" has no exact group match, so row 2 stays NEEDS_REVIEW
    // and is skipped at confirm
    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n\
               Bob Jones,bob@example.com,9876543211,EMPLOYEE,Enginering\n";

    let (import_id, _) = stage_session(&pool, csv, 30).await;
    confirm_and_run(&pool, import_id).await;

    let report = bulkreg_import::services::status_reporter::error_report_csv(&pool, import_id, 1)
        .await
        .expect("report");

    // The skipped row appears with its review reason; the successful
    // row does not
    assert!(report.contains("Bob Jones"));
    assert!(report.contains("Enginering"));
    assert!(!report.contains("Alice Smith"));
}

#[tokio::test]
async fn skipped_row_cannot_be_overridden_after_confirm() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n\
               Bob Jones,bob@example.com,9876543211,EMPLOYEE,Enginering\n";

    let (import_id, _) = stage_session(&pool, csv, 30).await;

    let outcome = sessions::confirm_session(&pool, import_id, 1)
        .await
        .expect("confirm");
    assert!(matches!(outcome, ConfirmOutcome::Started(_)));

    // Row 2's eligibility was frozen as SKIPPED at confirm
    let group = catalog::list_groups(&pool, 1).await.unwrap().remove(0);
    let result = sessions::apply_overrides(&pool, import_id, 1, &[(2, group.group_id)]).await;
    match result {
        Err(bulkreg_common::Error::InvalidInput(msg)) => {
            assert!(msg.contains("frozen at confirmation"), "got: {}", msg);
        }
        other => panic!("expected InvalidInput, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn concurrent_confirmation_spawns_one_job() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n";

    let (import_id, _) = stage_session(&pool, csv, 30).await;

    let (first, second) = tokio::join!(
        sessions::confirm_session(&pool, import_id, 1),
        sessions::confirm_session(&pool, import_id, 1),
    );
    let first = first.expect("first confirm");
    let second = second.expect("second confirm");

    let started = [&first, &second]
        .iter()
        .filter(|o| matches!(o, ConfirmOutcome::Started(_)))
        .count();
    assert_eq!(started, 1, "exactly one confirmation wins");

    // Both callers observe the same job
    assert_eq!(first.job().job_id, second.job().job_id);
    assert_eq!(first.job().job_id, import_id);
}

#[tokio::test]
async fn rows_keep_original_file_order() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Zed Last,zed@example.com,9876543210,EMPLOYEE,Engineering\n\
               Amy First,amy@example.com,9876543211,EMPLOYEE,Engineering\n\
               Mid Person,mid@example.com,9876543212,EMPLOYEE,Engineering\n";

    let (import_id, _) = stage_session(&pool, csv, 30).await;

    let all_rows = rows::load_rows(&pool, import_id).await.unwrap();
    let indices: Vec<i64> = all_rows.iter().map(|r| r.row_index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert_eq!(
        all_rows[0].parsed.as_ref().unwrap().full_name.as_deref(),
        Some("Zed Last")
    );
}

#[tokio::test]
async fn expired_preview_sessions_are_swept() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n";

    // Negative TTL: expired the moment it was created
    let (expired_id, _) = stage_session(&pool, csv, -1).await;
    let (live_id, _) = stage_session(&pool, csv, 30).await;
    let (confirmed_id, _) = stage_session(&pool, csv, -1).await;
    sessions::set_status(&pool, confirmed_id, SessionStatus::Confirmed, None)
        .await
        .unwrap();

    let swept = sessions::sweep_expired(&pool).await.unwrap();
    assert_eq!(swept, 1);

    assert!(sessions::load_session(&pool, expired_id, 1)
        .await
        .unwrap()
        .is_none());
    assert!(rows::load_rows(&pool, expired_id).await.unwrap().is_empty());
    // Unexpired and already-confirmed sessions survive the sweep
    assert!(sessions::load_session(&pool, live_id, 1)
        .await
        .unwrap()
        .is_some());
    assert!(sessions::load_session(&pool, confirmed_id, 1)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn expired_session_cannot_be_confirmed() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n";

    let (import_id, _) = stage_session(&pool, csv, -1).await;

    let result = sessions::confirm_session(&pool, import_id, 1).await;
    assert!(matches!(result, Err(bulkreg_common::Error::InvalidInput(_))));
}

#[tokio::test]
async fn resumed_job_skips_recorded_rows() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n\
               Bob Jones,bob@example.com,9876543211,EMPLOYEE,Engineering\n";

    let (import_id, _) = stage_session(&pool, csv, 30).await;

    let outcome = sessions::confirm_session(&pool, import_id, 1)
        .await
        .unwrap();
    assert!(matches!(outcome, ConfirmOutcome::Started(_)));

    // Simulate a crash after the first row was durably recorded
    let recorded = rows::record_outcome(&pool, import_id, 1, RowOutcome::Success, None)
        .await
        .unwrap();
    assert!(recorded);

    JobExecutor::new(pool.clone(), 0)
        .run(import_id, 1)
        .await
        .expect("resumed run");

    let session = sessions::load_session(&pool, import_id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    // Row 1 was counted once, not re-attempted: only Bob's registration
    // was actually created
    assert_eq!(session.success_count, 2);
    assert_eq!(registrations::count_registrations(&pool, 1).await.unwrap(), 1);

    // Recording the same row again is a no-op
    let again = rows::record_outcome(&pool, import_id, 1, RowOutcome::Failed, Some("late"))
        .await
        .unwrap();
    assert!(!again);
}

#[tokio::test]
async fn job_status_projection_reflects_counts() {
    let pool = test_pool().await;

    let csv = "Full Name,Email,Mobile,Program,Group\n\
               Alice Smith,alice@example.com,9876543210,EMPLOYEE,Engineering\n\
               Broken Row,broken-email,9876543211,EMPLOYEE,Engineering\n";

    let (import_id, _) = stage_session(&pool, csv, 30).await;

    // No job exists before confirmation
    let status = bulkreg_import::services::status_reporter::job_status(&pool, import_id, 1).await;
    assert!(matches!(status, Err(bulkreg_common::Error::NotFound(_))));

    confirm_and_run(&pool, import_id).await;

    let job = bulkreg_import::services::status_reporter::job_status(&pool, import_id, 1)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counts.total, 2);
    assert_eq!(job.counts.success, 1);
    assert_eq!(job.counts.skipped, 1);
    assert_eq!(job.progress_percent, 100);
}
