//! Row validator: business rules over parsed rows
//!
//! Pure given the session's rows and preloaded reference data (the
//! owner's program catalog and group list). Verdicts are computed once
//! and attached to the rows; nothing here throws across the row boundary.
//!
//! Rule precedence (short-circuit on first hard failure):
//! 1. Required fields present and well-formed
//! 2. Program resolvable against the catalog
//! 3. Schedule window parseable with start <= end
//! 4. Group-name matching (the one NEEDS_REVIEW case recoverable via override)
//! Then a session-scoped duplicate pass over emails and mobiles, each
//! checked independently.

use bulkreg_common::Result;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::db::catalog::{self, GroupRef, ProgramRef};
use crate::models::{GroupCandidate, ImportRow, RowValidation};
use crate::services::row_parser::normalize_key;

/// Fuzzy group matching thresholds (edit distance and length window)
const GROUP_MATCH_MAX_DISTANCE: usize = 2;
const GROUP_MATCH_LENGTH_WINDOW: usize = 3;

const DEFAULT_COUNTRY_CODE: &str = "+91";

/// Owner-scoped lookup data the validator is pure over
pub struct ReferenceData {
    pub programs: Vec<ProgramRef>,
    pub groups: Vec<GroupRef>,
}

/// Result of resolving a group name against the owner's groups
pub struct GroupMatch {
    /// Single unambiguous match, if any
    pub exact: Option<i64>,
    /// Near matches offered for override selection
    pub candidates: Vec<GroupCandidate>,
}

impl ReferenceData {
    pub async fn load(pool: &SqlitePool, owner_id: i64) -> Result<Self> {
        Ok(Self {
            programs: catalog::list_programs(pool).await?,
            groups: catalog::list_groups(pool, owner_id).await?,
        })
    }

    /// Match a program by code or name, normalized
    pub fn resolve_program(&self, reference: &str) -> Option<&ProgramRef> {
        let normalized = normalize_key(reference);
        self.programs
            .iter()
            .find(|p| normalize_key(&p.code) == normalized || normalize_key(&p.name) == normalized)
    }

    /// Match a group name: exact (normalized) first, then fuzzy candidates
    pub fn resolve_group(&self, name: &str) -> GroupMatch {
        let normalized = normalize_key(name);
        let exact: Vec<&GroupRef> = self
            .groups
            .iter()
            .filter(|g| normalize_key(&g.name) == normalized)
            .collect();

        match exact.len() {
            1 => GroupMatch {
                exact: Some(exact[0].group_id),
                candidates: Vec::new(),
            },
            0 => GroupMatch {
                exact: None,
                candidates: self.fuzzy_candidates(name),
            },
            // Two differently-spelled groups normalize to the same key
            _ => GroupMatch {
                exact: None,
                candidates: exact
                    .into_iter()
                    .map(|g| GroupCandidate {
                        group_id: g.group_id,
                        name: g.name.clone(),
                        score: 100,
                    })
                    .collect(),
            },
        }
    }

    fn fuzzy_candidates(&self, name: &str) -> Vec<GroupCandidate> {
        let input = name.to_lowercase();
        let mut candidates = Vec::new();

        for group in &self.groups {
            if group.name.len().abs_diff(name.len()) > GROUP_MATCH_LENGTH_WINDOW {
                continue;
            }
            let distance = strsim::levenshtein(&input, &group.name.to_lowercase());
            if distance <= GROUP_MATCH_MAX_DISTANCE {
                let len = name.len().max(group.name.len()).max(1);
                let score = ((1.0 - distance as f64 / len as f64) * 100.0).round() as u8;
                candidates.push(GroupCandidate {
                    group_id: group.group_id,
                    name: group.name.clone(),
                    score,
                });
            }
        }

        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates
    }
}

/// Validate every parsed row, then apply the session-scoped duplicate pass
pub fn validate_rows(rows: &mut [ImportRow], refs: &ReferenceData) {
    for row in rows.iter_mut() {
        if row.parsed.is_some() {
            validate_row(row, refs);
        }
        // Rows the parser could not extract keep their parser diagnostic
    }

    flag_duplicates(rows);
}

fn invalid(row: &mut ImportRow, message: String) {
    row.validation_status = RowValidation::Invalid;
    row.validation_message = Some(message);
}

fn validate_row(row: &mut ImportRow, refs: &ReferenceData) {
    let Some(mut candidate) = row.parsed.clone() else {
        return;
    };

    // Rule 1: required fields, well-formed
    if candidate.full_name.is_none() {
        return invalid(row, "Full name is required".to_string());
    }

    match candidate.email.as_deref() {
        None => return invalid(row, "Email is required".to_string()),
        Some(email) if !is_plausible_email(email) => {
            return invalid(row, format!("Email '{}' is not a valid address", email));
        }
        Some(_) => {}
    }

    let country_code = normalize_country_code(
        candidate.country_code.as_deref().unwrap_or(DEFAULT_COUNTRY_CODE),
    );
    let country_code = match country_code {
        Some(code) => code,
        None => {
            return invalid(
                row,
                format!(
                    "Country code '{}' is invalid; expected + followed by 1-4 digits",
                    candidate.country_code.as_deref().unwrap_or("")
                ),
            );
        }
    };
    candidate.country_code = Some(country_code.clone());

    match candidate.mobile.as_deref() {
        None => return invalid(row, "Mobile is required".to_string()),
        Some(mobile) => match mobile_digits(mobile) {
            None => {
                return invalid(row, format!("Mobile '{}' contains non-digit characters", mobile));
            }
            Some(digits) => {
                if let Err(expected) = check_digit_count(&country_code, digits.len()) {
                    return invalid(
                        row,
                        format!(
                            "Mobile '{}' must have {} digits for country code {}",
                            mobile, expected, country_code
                        ),
                    );
                }
                candidate.mobile = Some(digits);
            }
        },
    }

    // Rule 2: program resolvable
    match candidate.program_code.as_deref() {
        None => return invalid(row, "Program is required".to_string()),
        Some(code) => match refs.resolve_program(code) {
            Some(program) => row.program_id = Some(program.program_id),
            None => {
                return invalid(row, format!("Program '{}' is not in the catalog", code));
            }
        },
    }

    // Rule 3: schedule window, if present
    match (candidate.window_start.as_deref(), candidate.window_end.as_deref()) {
        (None, None) => {}
        (Some(_), None) | (None, Some(_)) => {
            return invalid(
                row,
                "Both window start and end are required when either is given".to_string(),
            );
        }
        (Some(start), Some(end)) => {
            let start_dt = match parse_window_datetime(start) {
                Some(dt) => dt,
                None => return invalid(row, format!("Unrecognized date '{}'", start)),
            };
            let end_dt = match parse_window_datetime(end) {
                Some(dt) => dt,
                None => return invalid(row, format!("Unrecognized date '{}'", end)),
            };
            if start_dt > end_dt {
                return invalid(
                    row,
                    format!("Window start '{}' is after window end '{}'", start, end),
                );
            }
        }
    }

    row.parsed = Some(candidate);

    // Rule 4: group matching - the one recoverable-by-override verdict
    let group_name = match row.parsed.as_ref().and_then(|c| c.group_name.clone()) {
        None => return invalid(row, "Group name is required".to_string()),
        Some(name) => name,
    };

    let group_match = refs.resolve_group(&group_name);
    match group_match.exact {
        Some(group_id) => {
            row.matched_group_id = Some(group_id);
            row.validation_status = RowValidation::Ready;
            row.validation_message = None;
        }
        None => {
            row.validation_status = RowValidation::NeedsReview;
            row.group_candidates = group_match.candidates;
            row.validation_message = Some(if row.group_candidates.is_empty() {
                format!(
                    "Group '{}' does not exist; select an existing group to continue",
                    group_name
                )
            } else {
                format!(
                    "Group '{}' is ambiguous; {} similar group(s) exist",
                    group_name,
                    row.group_candidates.len()
                )
            });
        }
    }
}

/// Session-scoped duplicate detection. Emails and mobiles collide
/// independently: two rows sharing only an email (or only a mobile) are
/// both flagged NEEDS_REVIEW, since either one would hit the store's
/// per-column uniqueness at execution time. Each flagged row names the
/// other row it collides with.
fn flag_duplicates(rows: &mut [ImportRow]) {
    let mut by_email: HashMap<String, Vec<usize>> = HashMap::new();
    let mut by_mobile: HashMap<String, Vec<usize>> = HashMap::new();

    for (idx, row) in rows.iter().enumerate() {
        if row.validation_status == RowValidation::Invalid {
            continue;
        }
        if let Some(candidate) = &row.parsed {
            if let Some(email) = &candidate.email {
                by_email.entry(email.to_lowercase()).or_default().push(idx);
            }
            if let Some(mobile) = &candidate.mobile {
                by_mobile.entry(mobile.clone()).or_default().push(idx);
            }
        }
    }

    flag_collisions(rows, &by_email, "email");
    flag_collisions(rows, &by_mobile, "mobile");
}

fn flag_collisions(rows: &mut [ImportRow], groups: &HashMap<String, Vec<usize>>, field: &str) {
    for (value, indexes) in groups {
        if indexes.len() < 2 {
            continue;
        }
        for &idx in indexes {
            let Some(other) = indexes.iter().find(|&&i| i != idx).copied() else {
                continue;
            };
            let other_row_index = rows[other].row_index;

            let row = &mut rows[idx];
            // Keep an earlier rule-4 message; precedence is first failure
            if row.validation_status == RowValidation::Ready {
                row.validation_status = RowValidation::NeedsReview;
                row.validation_message = Some(format!(
                    "Duplicate of row {}: same {} '{}'",
                    other_row_index, field, value
                ));
            }
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

/// '+' prefixed, 1-4 digits; a bare numeric code gets the '+' added
fn normalize_country_code(code: &str) -> Option<String> {
    let code = code.trim();
    let normalized = if code.starts_with('+') {
        code.to_string()
    } else {
        format!("+{}", code)
    };
    let digits = &normalized[1..];
    if (1..=4).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(normalized)
    } else {
        None
    }
}

/// Strip separators; None if anything other than digits remains
fn mobile_digits(mobile: &str) -> Option<String> {
    let cleaned: String = mobile
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    if !cleaned.is_empty() && cleaned.chars().all(|c| c.is_ascii_digit()) {
        Some(cleaned)
    } else {
        None
    }
}

/// Expected national digit count per country code; unknown codes accept
/// any plausible length
fn check_digit_count(country_code: &str, digits: usize) -> std::result::Result<(), String> {
    let expected: Option<usize> = match country_code {
        "+1" => Some(10),
        "+44" => Some(10),
        "+61" => Some(9),
        "+91" => Some(10),
        "+971" => Some(9),
        _ => None,
    };

    match expected {
        Some(expected) if digits != expected => Err(expected.to_string()),
        Some(_) => Ok(()),
        None if (6..=14).contains(&digits) => Ok(()),
        None => Err("6 to 14".to_string()),
    }
}

/// Forgiving date parser for upload cells. ISO forms first, then
/// month-first, then day-first numeric forms; month-first wins when a
/// value satisfies both.
pub fn parse_window_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%m-%d-%Y %H:%M",
        "%d-%m-%Y %H:%M",
        "%m/%d/%Y %H:%M",
        "%d/%m/%Y %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }

    for format in ["%Y-%m-%d", "%m-%d-%Y", "%d-%m-%Y", "%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    None
}
