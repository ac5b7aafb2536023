//! Row parser: raw uploaded CSV bytes → typed candidate rows
//!
//! Pure over the input bytes, no business rules. Column headers are
//! matched case-insensitively against a fixed synonym table. Rows are
//! never dropped: one `ImportRow` out per data row in, so `row_index`
//! maps 1:1 back to the source file.

use bulkreg_common::{Error, Result};
use csv::{ReaderBuilder, Trim};
use std::collections::BTreeMap;

use crate::models::{ImportRow, ParsedCandidate};

/// Canonical columns the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    FullName,
    Email,
    Mobile,
    CountryCode,
    ProgramCode,
    GroupName,
    WindowStart,
    WindowEnd,
}

/// Header synonym table, consulted once per file. Keys are compared after
/// normalization, so `FullName`, `full_name`, and `FULL NAME` all match.
const SYNONYMS: &[(Column, &[&str])] = &[
    (Column::FullName, &["fullname", "name", "candidatename"]),
    (Column::Email, &["email", "emailaddress", "emailid"]),
    (
        Column::Mobile,
        &["mobile", "mobilenumber", "mobileno", "phone", "phonenumber"],
    ),
    (Column::CountryCode, &["countrycode"]),
    (Column::ProgramCode, &["programid", "programcode", "program"]),
    (Column::GroupName, &["groupname", "group"]),
    (
        Column::WindowStart,
        &["examstart", "examstartdate", "validfrom", "windowstart", "startdate"],
    ),
    (
        Column::WindowEnd,
        &["examend", "examenddate", "validto", "windowend", "enddate"],
    ),
];

/// Lowercase and strip everything but letters and digits
pub fn normalize_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn recognize(header: &str) -> Option<Column> {
    let normalized = normalize_key(header);
    SYNONYMS
        .iter()
        .find(|(_, names)| names.contains(&normalized.as_str()))
        .map(|(column, _)| *column)
}

/// Parse an uploaded CSV file into import rows.
///
/// File-level failures (empty file, missing header, no recognizable
/// identity columns) return `Err` before any row is produced. Everything
/// past that point is a row-level diagnostic, never an error.
pub fn parse(bytes: &[u8]) -> Result<Vec<ImportRow>> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(Error::InvalidInput("Uploaded file is empty".to_string()));
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("Invalid CSV format: {}", e)))?
        .clone();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(Error::InvalidInput(
            "File has no header row".to_string(),
        ));
    }

    // First matching header wins when a file repeats a column
    let mut mapping: Vec<Option<Column>> = vec![None; headers.len()];
    let mut seen: Vec<Column> = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if let Some(column) = recognize(header) {
            if !seen.contains(&column) {
                mapping[idx] = Some(column);
                seen.push(column);
            }
        }
    }

    let has_identity_column = seen
        .iter()
        .any(|c| matches!(c, Column::FullName | Column::Email | Column::Mobile));
    if !has_identity_column {
        return Err(Error::InvalidInput(format!(
            "No recognizable name, email, or mobile column in header: {}",
            headers.iter().collect::<Vec<_>>().join(", ")
        )));
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let row_index = (i + 1) as i64;

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                rows.push(ImportRow::unparsed(
                    row_index,
                    BTreeMap::new(),
                    format!("Unreadable row: {}", e),
                ));
                continue;
            }
        };

        let mut raw_data = BTreeMap::new();
        let mut candidate = ParsedCandidate::default();

        for (idx, cell) in record.iter().enumerate() {
            if let Some(header) = headers.get(idx) {
                if !header.is_empty() {
                    raw_data.insert(header.to_string(), cell.to_string());
                }
            }

            if cell.is_empty() {
                continue;
            }
            let value = Some(cell.to_string());
            match mapping.get(idx).copied().flatten() {
                Some(Column::FullName) => candidate.full_name = value,
                Some(Column::Email) => candidate.email = value,
                Some(Column::Mobile) => candidate.mobile = value,
                Some(Column::CountryCode) => candidate.country_code = value,
                Some(Column::ProgramCode) => candidate.program_code = value,
                Some(Column::GroupName) => candidate.group_name = value,
                Some(Column::WindowStart) => candidate.window_start = value,
                Some(Column::WindowEnd) => candidate.window_end = value,
                None => {}
            }
        }

        if candidate.has_identity() {
            rows.push(ImportRow::parsed(row_index, raw_data, candidate));
        } else {
            rows.push(ImportRow::unparsed(
                row_index,
                raw_data,
                "Row has no name, email, or mobile value".to_string(),
            ));
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RowValidation;

    #[test]
    fn row_count_in_equals_row_count_out() {
        let file = b"Name,Email,Mobile\na,a@x.com,1\n,,\nc,c@x.com,3\n";
        let rows = parse(file).unwrap();
        // The comma-only row is still a record; only fully blank lines
        // are not data rows
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].row_index, 1);
        assert_eq!(rows[2].row_index, 3);
    }

    #[test]
    fn header_synonyms_match_case_insensitively() {
        let file = b"FULL_NAME,email_id,Mobile Number,group name\nAda,ada@x.com,9876543210,Sales\n";
        let rows = parse(file).unwrap();
        let parsed = rows[0].parsed.as_ref().unwrap();
        assert_eq!(parsed.full_name.as_deref(), Some("Ada"));
        assert_eq!(parsed.email.as_deref(), Some("ada@x.com"));
        assert_eq!(parsed.mobile.as_deref(), Some("9876543210"));
        assert_eq!(parsed.group_name.as_deref(), Some("Sales"));
    }

    #[test]
    fn column_order_does_not_matter() {
        let file = b"Email,Name\nada@x.com,Ada\n";
        let rows = parse(file).unwrap();
        let parsed = rows[0].parsed.as_ref().unwrap();
        assert_eq!(parsed.full_name.as_deref(), Some("Ada"));
        assert_eq!(parsed.email.as_deref(), Some("ada@x.com"));
    }

    #[test]
    fn row_without_identity_gets_diagnostic_not_dropped() {
        let file = b"Name,Email,GroupName\nAda,ada@x.com,Sales\n,,Marketing\n";
        let rows = parse(file).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].parsed.is_none());
        assert_eq!(rows[1].validation_status, RowValidation::Invalid);
        assert!(rows[1].validation_message.as_ref().unwrap().contains("no name"));
    }

    #[test]
    fn raw_data_preserved_verbatim() {
        let file = b"Name,Email,Custom Note\nAda,ada@x.com,keep me\n";
        let rows = parse(file).unwrap();
        assert_eq!(rows[0].raw_data.get("Custom Note").unwrap(), "keep me");
    }

    #[test]
    fn empty_file_is_a_file_level_error() {
        assert!(parse(b"").is_err());
        assert!(parse(b"   \n  ").is_err());
    }

    #[test]
    fn unrecognizable_header_is_a_file_level_error() {
        let err = parse(b"Foo,Bar\n1,2\n").unwrap_err();
        assert!(err.to_string().contains("No recognizable"));
    }
}
