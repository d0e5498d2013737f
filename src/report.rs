//! Tabular access reports over the permission model.
//!
//! Tables are deterministic: the same model and the same requested scope
//! always produce the same rows, so outputs are safe to golden-test.

use std::path::Path;

use serde::Serialize;

use crate::constants::access_display;
use crate::error::{FlsError, Result};
use crate::model::{HolderId, PermissionModel};

/// Structured rows/columns handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut w = csv::Writer::from_path(path).map_err(csv_io)?;
        w.write_record(&self.headers).map_err(csv_io)?;
        for row in &self.rows {
            w.write_record(row).map_err(csv_io)?;
        }
        w.flush()?;
        Ok(())
    }
}

fn csv_io(e: csv::Error) -> FlsError {
    FlsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

fn sorted_scope(holders: &[HolderId]) -> Vec<HolderId> {
    let mut scope = holders.to_vec();
    scope.sort();
    scope.dedup();
    scope
}

/// Field-level security matrix: one row per (object, field), one column
/// per holder, cells showing explicit access.
pub fn field_report(
    model: &PermissionModel,
    holders: &[HolderId],
    fields: &[(String, String)],
) -> Table {
    let scope = sorted_scope(holders);
    let mut keys = fields.to_vec();
    keys.sort();
    keys.dedup();

    let mut headers = vec!["ObjectName".to_string(), "FieldName".to_string()];
    headers.extend(scope.iter().map(|h| h.name.clone()));

    let rows = keys
        .iter()
        .map(|(object, field)| {
            let full = format!("{}.{}", object, field);
            let mut row = vec![object.clone(), field.clone()];
            for id in &scope {
                let grant = model
                    .holder(id)
                    .ok()
                    .and_then(|h| h.field_grant(&full))
                    .unwrap_or_default();
                row.push(grant.display().to_string());
            }
            row
        })
        .collect();
    Table { headers, rows }
}

/// Object permission matrix: one row per object, one column per holder,
/// cells in the six-flag short form.
pub fn object_report(model: &PermissionModel, holders: &[HolderId], objects: &[String]) -> Table {
    let scope = sorted_scope(holders);
    let mut names = objects.to_vec();
    names.sort();
    names.dedup();

    let mut headers = vec!["ObjectName".to_string()];
    headers.extend(scope.iter().map(|h| h.name.clone()));

    let rows = names
        .iter()
        .map(|object| {
            let mut row = vec![object.clone()];
            for id in &scope {
                let grant = model
                    .holder(id)
                    .ok()
                    .and_then(|h| h.object_grant(object))
                    .unwrap_or_default();
                row.push(grant.display_short());
            }
            row
        })
        .collect();
    Table { headers, rows }
}

/// Who has access to this field. Exhaustive over the requested holder
/// set: holders with no explicit grant appear with all-false access,
/// sorted by holder id ascending.
pub fn reverse_lookup(
    model: &PermissionModel,
    holders: &[HolderId],
    object: &str,
    field: &str,
) -> Vec<(HolderId, bool, bool)> {
    let scope = sorted_scope(holders);
    let full = format!("{}.{}", object, field);
    scope
        .into_iter()
        .map(|id| {
            let grant = model
                .holder(&id)
                .ok()
                .and_then(|h| h.field_grant(&full))
                .unwrap_or_default();
            (id, grant.readable, grant.editable)
        })
        .collect()
}

/// Like `field_report`, but resolving object-level overrides: a holder
/// with modifyAllRecords or viewAllRecords on the object shows the access
/// those grants imply, annotated with where it came from.
pub fn effective_field_report(
    model: &PermissionModel,
    holders: &[HolderId],
    fields: &[(String, String)],
) -> Table {
    let scope = sorted_scope(holders);
    let mut keys = fields.to_vec();
    keys.sort();
    keys.dedup();

    let mut headers = vec!["ObjectName".to_string(), "FieldName".to_string()];
    headers.extend(scope.iter().map(|h| h.name.clone()));

    let rows = keys
        .iter()
        .map(|(object, field)| {
            let full = format!("{}.{}", object, field);
            let mut row = vec![object.clone(), field.clone()];
            for id in &scope {
                let Ok(holder) = model.holder(id) else {
                    row.push(access_display(false, false).to_string());
                    continue;
                };
                let explicit = holder.field_grant(&full).unwrap_or_default();
                let effective = holder.effective_field_access(object, &full);
                let mut cell = effective.display().to_string();
                if effective != explicit {
                    if let Some(og) = holder.object_grant(object) {
                        if og.modify_all {
                            cell.push_str(" (via ModifyAllRecords)");
                        } else if og.view_all {
                            cell.push_str(" (via ViewAllRecords)");
                        }
                    }
                }
                row.push(cell);
            }
            row
        })
        .collect();
    Table { headers, rows }
}
