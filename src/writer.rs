//! Applies a plan to the metadata files.
//!
//! Every touched file is snapshotted before its first write, serialized
//! with the mutations applied, and replaced atomically (write-to-temp,
//! then rename). A filesystem failure aborts only the affected file.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::backup::{BackupManager, OperationId};
use crate::constants::{tag_order_index, OBJECT_PERM_TAGS};
use crate::error::{FlsError, Result};
use crate::model::{FieldGrant, GrantKey, HolderId, HolderKind, ObjectGrant, PermissionModel};
use crate::planner::{GrantValue, Mutation, PlanResult};
use crate::xml::{Element, Node};

const PACKAGE_XML: &str = "package.xml";

/// Outcome of one apply
#[derive(Debug, Default)]
pub struct ApplyResult {
    /// Backup operation covering this apply; absent on dry runs and
    /// empty plans
    pub operation: Option<OperationId>,
    pub files_written: BTreeSet<PathBuf>,
    pub mutations_applied: usize,
    /// Exactly which grants changed, in application order
    pub changed: Vec<(HolderId, GrantKey)>,
    /// Files that could not be written; the rest of the apply proceeded
    pub failed: Vec<(PathBuf, FlsError)>,
}

/// Apply a plan. With `dry_run` nothing is touched and the result
/// describes what would change; otherwise each touched file is
/// snapshotted, rewritten and the model updated to match.
pub fn apply(
    model: &mut PermissionModel,
    plan: &PlanResult,
    dry_run: bool,
    backups: &BackupManager,
) -> Result<ApplyResult> {
    let mut result = ApplyResult::default();
    if plan.mutations.is_empty() {
        return Ok(result);
    }

    // Group mutations per holder, preserving plan order within each
    let mut by_holder: BTreeMap<HolderId, Vec<&Mutation>> = BTreeMap::new();
    for m in &plan.mutations {
        by_holder.entry(m.holder.clone()).or_default().push(m);
    }

    let operation = if dry_run { None } else { Some(backups.begin_operation("bulk_apply")?) };
    let mut summary: Vec<SummaryRow> = Vec::new();
    let mut modified_profiles: Vec<String> = Vec::new();
    let mut modified_permsets: Vec<String> = Vec::new();

    for (holder_id, mutations) in by_holder {
        let Ok(holder) = model.holder(&holder_id) else {
            continue;
        };
        let path = holder.source_path.clone();
        let mut doc = holder.doc.clone();
        let mut staged: Vec<(GrantKey, GrantValue)> = Vec::new();
        let mut rows: Vec<SummaryRow> = Vec::new();

        for m in &mutations {
            let current = staged
                .iter()
                .rev()
                .find(|(k, _)| *k == m.key)
                .map(|(_, v)| *v)
                .unwrap_or_else(|| current_value(holder, &m.key));
            if current == m.after {
                // Already satisfied, e.g. the visible auto-repair record
                continue;
            }
            match m.after {
                GrantValue::Field(grant) => {
                    if let Some(full) = m.key.full_field() {
                        update_field_permission(&mut doc.root, &full, grant);
                    }
                }
                GrantValue::Object(grant) => {
                    update_object_permission(&mut doc.root, &m.key.object, grant);
                }
            }
            staged.push((m.key.clone(), m.after));
            rows.push(SummaryRow::new(&holder_id, m));
        }

        if staged.is_empty() {
            continue;
        }

        if dry_run {
            result.mutations_applied += staged.len();
            result.changed.extend(staged.iter().map(|(k, _)| (holder_id.clone(), k.clone())));
            result.files_written.insert(path);
            continue;
        }

        if path.is_file() {
            if let Some(op) = &operation {
                if let Err(e) = backups.snapshot(op, &path) {
                    warn!(file = %path.display(), error = %e, "snapshot failed; file skipped");
                    result.failed.push((path, e));
                    continue;
                }
            }
        }

        let serialized = doc.to_xml()?;
        if let Err(e) = atomic_write(&path, serialized.as_bytes()) {
            result.failed.push((path, e));
            continue;
        }

        // Disk and model now agree; commit the new state
        result.mutations_applied += staged.len();
        result.changed.extend(staged.iter().map(|(k, _)| (holder_id.clone(), k.clone())));
        result.files_written.insert(path.clone());
        summary.append(&mut rows);
        model.holder_mut(&holder_id)?.doc = doc;
        for (key, value) in staged {
            match value {
                GrantValue::Field(g) => model.record_field_grant(&holder_id, &key, g),
                GrantValue::Object(g) => model.record_object_grant(&holder_id, &key, g),
            }
        }
        match holder_id.kind {
            HolderKind::Profile => modified_profiles.push(holder_id.name.clone()),
            HolderKind::PermissionSet => modified_permsets.push(holder_id.name.clone()),
        }
        info!(holder = %holder_id, "applied permission changes");
    }

    if let Some(op) = &operation {
        if !result.files_written.is_empty() {
            write_summary(backups, op, &summary)?;
            write_package_xml(backups, op, &modified_profiles, &modified_permsets, &mut result);
        } else if result.failed.is_empty() {
            // Nothing changed after all; drop the empty operation
            backups.prune(op)?;
        }
    }
    result.operation = if result.files_written.is_empty() && result.failed.is_empty() {
        None
    } else {
        operation
    };
    Ok(result)
}

fn current_value(holder: &crate::model::Holder, key: &GrantKey) -> GrantValue {
    match key.full_field() {
        Some(full) => GrantValue::Field(holder.field_grant(&full).unwrap_or_default()),
        None => GrantValue::Object(holder.object_grant(&key.object).unwrap_or_default()),
    }
}

/// Regenerate package.xml for the holders this apply modified, taking a
/// snapshot of the previous one first.
fn write_package_xml(
    backups: &BackupManager,
    op: &OperationId,
    profiles: &[String],
    permsets: &[String],
    result: &mut ApplyResult,
) {
    let Some(doc) = crate::package::generate_package(profiles, permsets) else {
        return;
    };
    let path = backups.meta_root().join(PACKAGE_XML);
    if path.is_file() {
        if let Err(e) = backups.snapshot(op, &path) {
            warn!(error = %e, "could not snapshot existing package.xml; not regenerating");
            return;
        }
    }
    match doc.to_xml().and_then(|xml| atomic_write(&path, xml.as_bytes())) {
        Ok(()) => info!(path = %path.display(), "package.xml regenerated"),
        Err(e) => result.failed.push((path, e)),
    }
}

#[derive(serde::Serialize)]
struct SummaryRow {
    target: String,
    target_type: String,
    grant: String,
    change_type: &'static str,
    before: String,
    after: String,
    source: String,
}

impl SummaryRow {
    fn new(holder: &HolderId, m: &Mutation) -> Self {
        let (change_type, before, after) = match (m.before, m.after) {
            (GrantValue::Field(b), GrantValue::Field(a)) => {
                ("FLS", b.display().to_string(), a.display().to_string())
            }
            (GrantValue::Object(b), GrantValue::Object(a)) => {
                ("ObjectPermission", b.display_short(), a.display_short())
            }
            // Mixed pairs cannot be produced by the planner
            _ => ("Unknown", String::new(), String::new()),
        };
        SummaryRow {
            target: holder.name.clone(),
            target_type: holder.kind.to_string(),
            grant: m.key.to_string(),
            change_type,
            before,
            after,
            source: m.source.to_string(),
        }
    }
}

/// Record what was applied next to the snapshots it can be rolled back from
fn write_summary(backups: &BackupManager, op: &OperationId, rows: &[SummaryRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let path = backups.operation_dir(op).join("applied_changes.csv");
    let mut w = csv::Writer::from_path(&path)
        .map_err(|e| FlsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    for row in rows {
        w.serialize(row)
            .map_err(|e| FlsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    }
    w.flush()?;
    Ok(())
}

/// Write-to-temp then rename, so a crash mid-write never leaves a
/// half-written file.
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let write_err = |source: std::io::Error| FlsError::Write { path: path.to_path_buf(), source };
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(content).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

// ============================================================================
// XML mutation rules
// ============================================================================

/// Element index at which a new block of the given tag belongs, following
/// the canonical metadata tag ordering. None means append.
fn insertion_index(root: &Element, tag: &str) -> Option<usize> {
    let current = tag_order_index(tag);
    let mut after: Option<usize> = None;
    for (idx, child) in root.elements().enumerate() {
        if let Some(child_order) = tag_order_index(&child.name) {
            let earlier = current.map(|c| child_order < c).unwrap_or(false);
            if child.name == tag || earlier {
                after = Some(idx + 1);
            }
        }
    }
    if after.is_some() {
        return after;
    }
    let current = current?;
    root.elements()
        .enumerate()
        .find(|(_, child)| tag_order_index(&child.name).map(|o| o > current).unwrap_or(false))
        .map(|(idx, _)| idx)
}

/// Keep the first block matching the predicate, dropping duplicates
fn dedupe_blocks<F: Fn(&Element) -> bool>(root: &mut Element, pred: F) -> bool {
    let mut seen = false;
    let mut removed = false;
    root.children.retain(|n| match n {
        Node::Elem(e) if pred(e) => {
            if seen {
                removed = true;
                false
            } else {
                seen = true;
                true
            }
        }
        _ => true,
    });
    if removed {
        warn!("duplicate permission blocks collapsed");
    }
    seen
}

fn bool_text(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

/// Set the field-level security block for one field. A brand-new all-false
/// grant is omitted entirely, matching the platform convention that
/// omission means no access; existing blocks are updated in place.
pub(crate) fn update_field_permission(root: &mut Element, field_api: &str, grant: FieldGrant) {
    let matches = |e: &Element| e.name == "fieldPermissions" && e.child_text("field") == Some(field_api);
    let exists = dedupe_blocks(root, matches);
    if !exists {
        if grant == FieldGrant::default() {
            return;
        }
        let mut fp = Element::new("fieldPermissions");
        fp.push_element(Element::with_text("editable", "false"));
        fp.push_element(Element::with_text("field", field_api));
        fp.push_element(Element::with_text("readable", "false"));
        match insertion_index(root, "fieldPermissions") {
            Some(idx) => root.insert_element(idx, fp),
            None => root.push_element(fp),
        }
    }
    let fp = root
        .elements_mut()
        .find(|e| e.name == "fieldPermissions" && e.child_text("field") == Some(field_api));
    if let Some(fp) = fp {
        fp.set_child_text("readable", bool_text(grant.readable));
        fp.set_child_text("editable", bool_text(grant.editable));
        reorder_children(fp, &["editable", "field", "readable"]);
    }
}

/// Set the object permission block for one object, with the six permission
/// tags alphabetical and `object` last.
pub(crate) fn update_object_permission(root: &mut Element, object_api: &str, grant: ObjectGrant) {
    let matches =
        |e: &Element| e.name == "objectPermissions" && e.child_text("object") == Some(object_api);
    let exists = dedupe_blocks(root, matches);
    if !exists {
        if grant == ObjectGrant::default() {
            return;
        }
        let mut op = Element::new("objectPermissions");
        let mut tags = OBJECT_PERM_TAGS;
        tags.sort_unstable();
        for tag in tags {
            op.push_element(Element::with_text(tag, "false"));
        }
        op.push_element(Element::with_text("object", object_api));
        match insertion_index(root, "objectPermissions") {
            Some(idx) => root.insert_element(idx, op),
            None => root.push_element(op),
        }
    }
    let op = root
        .elements_mut()
        .find(|e| e.name == "objectPermissions" && e.child_text("object") == Some(object_api));
    if let Some(op) = op {
        let flags = grant.flags();
        for (i, tag) in OBJECT_PERM_TAGS.iter().enumerate() {
            op.set_child_text(tag, bool_text(flags[i]));
        }
        let mut order: Vec<&str> = OBJECT_PERM_TAGS.to_vec();
        order.sort_unstable();
        order.push("object");
        reorder_children(op, &order);
    }
}

/// Rebuild a block's children in the given name order; unknown children
/// keep their relative order at the end.
fn reorder_children(elem: &mut Element, order: &[&str]) {
    let mut nodes = std::mem::take(&mut elem.children);
    for name in order {
        let mut i = 0;
        while i < nodes.len() {
            let is_match = matches!(&nodes[i], Node::Elem(e) if e.name == *name);
            if is_match {
                elem.children.push(nodes.remove(i));
            } else {
                i += 1;
            }
        }
    }
    elem.children.extend(nodes);
}

// ============================================================================
// Tests
// ============================================================================
