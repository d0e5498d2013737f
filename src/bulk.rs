//! CSV-driven bulk change requests.
//!
//! Two recognized report shapes, checked against an explicit required
//! column manifest before any row is read. A CSV missing required columns
//! is rejected whole; a malformed row becomes a row-tagged conflict and
//! the rest of the batch proceeds.

use std::path::Path;

use tracing::debug;

use crate::constants::parse_access_display;
use crate::error::{FlsError, Result};
use crate::model::{FieldGrant, HolderId, ObjectGrant, PermissionModel};
use crate::planner::{ChangeEntry, ChangeRequest, ChangeSource, Conflict, TargetSelection};
use crate::reader::ObjectCatalog;

// Header columns that are never treated as holder names
const FLS_META_COLUMNS: [&str; 4] = ["ObjectName", "FieldName", "FieldType", "Field Type"];

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| FlsError::CsvFormat(format!("{}: {}", path.display(), e)))
}

fn read_headers(rdr: &mut csv::Reader<std::fs::File>, path: &Path) -> Result<csv::StringRecord> {
    rdr.headers()
        .map(|h| h.clone())
        .map_err(|e| FlsError::CsvFormat(format!("{}: {}", path.display(), e)))
}

fn require_columns(headers: &csv::StringRecord, required: &[&str], path: &Path) -> Result<Vec<usize>> {
    let mut indices = Vec::with_capacity(required.len());
    let mut missing = Vec::new();
    for name in required {
        match headers.iter().position(|h| h == *name) {
            Some(i) => indices.push(i),
            None => missing.push(*name),
        }
    }
    if !missing.is_empty() {
        return Err(FlsError::CsvFormat(format!(
            "{}: missing required column(s): {}",
            path.display(),
            missing.join(", ")
        )));
    }
    Ok(indices)
}

/// Columns whose header names a loaded holder; everything else is ignored
fn holder_columns(
    model: &PermissionModel,
    headers: &csv::StringRecord,
    meta_columns: &[&str],
) -> Vec<(usize, HolderId)> {
    let mut cols = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        if meta_columns.contains(&header) {
            continue;
        }
        // A name that is both a profile and a permission set resolves to
        // the profile, matching the lookup order used elsewhere.
        let profile = HolderId::profile(header);
        let permset = HolderId::permission_set(header);
        if model.contains(&profile) {
            cols.push((i, profile));
        } else if model.contains(&permset) {
            cols.push((i, permset));
        } else {
            debug!(column = header, "csv column matches no loaded holder; ignored");
        }
    }
    cols
}

/// Build a field-security change request from a CSV report.
///
/// Required columns: `ObjectName`, `FieldName`. Every other column whose
/// header matches a loaded holder becomes a target; cells hold the access
/// codes `RW`, `R-` or `--` (empty means no request for that holder).
pub fn fls_request_from_csv(
    model: &PermissionModel,
    path: &Path,
    auto_repair: bool,
    catalog: Option<&ObjectCatalog>,
) -> Result<ChangeRequest> {
    let mut rdr = open(path)?;
    let headers = read_headers(&mut rdr, path)?;
    let required = require_columns(&headers, &["ObjectName", "FieldName"], path)?;
    let (obj_idx, field_idx) = (required[0], required[1]);
    let targets = holder_columns(model, &headers, &FLS_META_COLUMNS);

    let mut request = ChangeRequest { auto_repair, ..Default::default() };
    for (i, record) in rdr.records().enumerate() {
        let row = i + 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                request.carried_conflicts.push(row_conflict(row, "", None, e.to_string()));
                continue;
            }
        };
        let object = record.get(obj_idx).unwrap_or("").trim();
        let field = record.get(field_idx).unwrap_or("").trim();
        if object.is_empty() || field.is_empty() {
            request.carried_conflicts.push(row_conflict(
                row,
                object,
                (!field.is_empty()).then(|| field.to_string()),
                "missing ObjectName or FieldName".to_string(),
            ));
            continue;
        }
        let formula = catalog.map(|c| c.is_formula(object, field)).unwrap_or(false);
        for (col, holder) in &targets {
            let cell = record.get(*col).unwrap_or("").trim();
            if cell.is_empty() {
                continue;
            }
            let Some((readable, editable)) = parse_access_display(cell) else {
                request.carried_conflicts.push(Conflict {
                    holder: Some(holder.clone()),
                    object: object.to_string(),
                    field: Some(field.to_string()),
                    row: Some(row),
                    message: format!("unrecognized access code '{}'", cell),
                });
                continue;
            };
            let mut entry = ChangeEntry::field_security(
                TargetSelection::Holders(vec![holder.clone()]),
                object,
                field,
                FieldGrant::new(readable, editable),
                ChangeSource::CsvRow(row),
            );
            entry.formula = formula;
            request.push(entry);
        }
    }
    Ok(request)
}

/// Build an object-permission change request from a CSV report.
///
/// Required column: `ObjectName`. Holder columns hold the six-token short
/// form, e.g. `c r u d VA MA` with `-` for unset flags.
pub fn object_request_from_csv(
    model: &PermissionModel,
    path: &Path,
    auto_repair: bool,
) -> Result<ChangeRequest> {
    let mut rdr = open(path)?;
    let headers = read_headers(&mut rdr, path)?;
    let required = require_columns(&headers, &["ObjectName"], path)?;
    let obj_idx = required[0];
    let targets = holder_columns(model, &headers, &["ObjectName"]);

    let mut request = ChangeRequest { auto_repair, ..Default::default() };
    for (i, record) in rdr.records().enumerate() {
        let row = i + 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                request.carried_conflicts.push(row_conflict(row, "", None, e.to_string()));
                continue;
            }
        };
        let object = record.get(obj_idx).unwrap_or("").trim();
        if object.is_empty() {
            request.carried_conflicts.push(row_conflict(
                row,
                object,
                None,
                "missing ObjectName".to_string(),
            ));
            continue;
        }
        for (col, holder) in &targets {
            let cell = record.get(*col).unwrap_or("").trim();
            if cell.is_empty() {
                continue;
            }
            match ObjectGrant::parse_short(cell) {
                Ok(grant) => request.push(ChangeEntry::object_permissions(
                    TargetSelection::Holders(vec![holder.clone()]),
                    object,
                    grant,
                    ChangeSource::CsvRow(row),
                )),
                Err(message) => request.carried_conflicts.push(Conflict {
                    holder: Some(holder.clone()),
                    object: object.to_string(),
                    field: None,
                    row: Some(row),
                    message,
                }),
            }
        }
    }
    Ok(request)
}

fn row_conflict(row: usize, object: &str, field: Option<String>, message: String) -> Conflict {
    Conflict { holder: None, object: object.to_string(), field, row: Some(row), message }
}
