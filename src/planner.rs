//! Change planning: requested end states diffed against the model.
//!
//! Planning is pure: no file is read or written here. The plan is an
//! ordered mutation list plus the conflicts that excluded or annotated
//! requests. Re-planning an already-applied request yields zero mutations.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{FieldGrant, GrantKey, HolderId, HolderKind, ObjectGrant, PermissionModel};

/// Where a change entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSource {
    Manual,
    /// 1-based data row in the source CSV
    CsvRow(usize),
    /// Dependency upgrade added by the planner itself
    AutoRepair,
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeSource::Manual => f.write_str("manual"),
            ChangeSource::CsvRow(n) => write!(f, "csv row {}", n),
            ChangeSource::AutoRepair => f.write_str("auto-repair"),
        }
    }
}

/// Desired grant values for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantValue {
    Field(FieldGrant),
    Object(ObjectGrant),
}

/// Which holders an entry applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    Holders(Vec<HolderId>),
    AllOfKind(HolderKind),
    All,
}

/// One declarative change: desired end state per targeted grant
#[derive(Debug, Clone)]
pub struct ChangeEntry {
    pub targets: TargetSelection,
    pub object: String,
    pub field: Option<String>,
    pub value: GrantValue,
    pub source: ChangeSource,
    /// Formula fields can be made visible but never editable
    pub formula: bool,
}

impl ChangeEntry {
    pub fn field_security(
        targets: TargetSelection,
        object: impl Into<String>,
        field: impl Into<String>,
        grant: FieldGrant,
        source: ChangeSource,
    ) -> Self {
        ChangeEntry {
            targets,
            object: object.into(),
            field: Some(field.into()),
            value: GrantValue::Field(grant),
            source,
            formula: false,
        }
    }

    pub fn object_permissions(
        targets: TargetSelection,
        object: impl Into<String>,
        grant: ObjectGrant,
        source: ChangeSource,
    ) -> Self {
        ChangeEntry {
            targets,
            object: object.into(),
            field: None,
            value: GrantValue::Object(grant),
            source,
            formula: false,
        }
    }

    fn key(&self) -> GrantKey {
        GrantKey { object: self.object.clone(), field: self.field.clone() }
    }
}

/// Ordered sequence of change entries. Later entries targeting the same
/// grant win over earlier ones.
#[derive(Debug, Clone, Default)]
pub struct ChangeRequest {
    pub entries: Vec<ChangeEntry>,
    pub auto_repair: bool,
    /// Conflicts detected while building the request (e.g. malformed CSV
    /// rows); carried into the plan so nothing is silently dropped.
    pub carried_conflicts: Vec<Conflict>,
}

impl ChangeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_repair(mut self) -> Self {
        self.auto_repair = true;
        self
    }

    pub fn push(&mut self, entry: ChangeEntry) {
        self.entries.push(entry);
    }
}

/// A request that could not be planned as asked, with its coordinates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub holder: Option<HolderId>,
    pub object: String,
    pub field: Option<String>,
    pub row: Option<usize>,
    pub message: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(holder) = &self.holder {
            write!(f, "[{}] ", holder)?;
        }
        write!(f, "{}", self.object)?;
        if let Some(field) = &self.field {
            write!(f, ".{}", field)?;
        }
        if let Some(row) = self.row {
            write!(f, " (row {})", row)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// One planned grant change: before and after values for a single holder
#[derive(Debug, Clone)]
pub struct Mutation {
    pub holder: HolderId,
    pub key: GrantKey,
    pub before: GrantValue,
    pub after: GrantValue,
    pub source: ChangeSource,
}

/// Output of planning: ordered mutations plus conflicts
#[derive(Debug, Default)]
pub struct PlanResult {
    pub mutations: Vec<Mutation>,
    pub conflicts: Vec<Conflict>,
}

impl PlanResult {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Plan a change request against the current model.
///
/// For each entry the target holder set is resolved, the before value is
/// looked up (absent means all-false), and a mutation is emitted only when
/// the values differ. Dependency violations become conflicts unless
/// auto-repair is on, in which case the planned end state is the repaired
/// value and the upgrade is recorded as an extra auto-repair mutation.
/// Conflicts never abort the plan; unaffected mutations still proceed.
pub fn plan(model: &PermissionModel, request: &ChangeRequest) -> PlanResult {
    let mut result = PlanResult::default();
    result.conflicts.extend(request.carried_conflicts.iter().cloned());
    // Advisory override warnings are emitted once per holder per plan
    let mut warned_overrides: BTreeSet<HolderId> = BTreeSet::new();

    for entry in &request.entries {
        let targets = match resolve_targets(model, entry, &mut result.conflicts) {
            Some(t) => t,
            None => continue,
        };
        for holder_id in targets {
            let holder = match model.holder(&holder_id) {
                Ok(h) => h,
                Err(_) => continue,
            };
            if let Some(perm) = holder.system_override() {
                if warned_overrides.insert(holder_id.clone()) {
                    result.conflicts.push(Conflict {
                        holder: Some(holder_id.clone()),
                        object: entry.object.clone(),
                        field: entry.field.clone(),
                        row: row_of(entry.source),
                        message: format!(
                            "'{}' is enabled on this {}; granular changes may be overridden",
                            perm, holder_id.kind
                        ),
                    });
                }
            }
            match entry.value {
                GrantValue::Field(requested) => {
                    plan_field(entry, &holder_id, holder.field_grant(&full_field(entry)), requested, request.auto_repair, &mut result)
                }
                GrantValue::Object(requested) => {
                    plan_object(entry, &holder_id, holder.object_grant(&entry.object), requested, request.auto_repair, &mut result)
                }
            }
        }
    }
    result
}

fn full_field(entry: &ChangeEntry) -> String {
    match &entry.field {
        Some(f) => format!("{}.{}", entry.object, f),
        None => entry.object.clone(),
    }
}

fn row_of(source: ChangeSource) -> Option<usize> {
    match source {
        ChangeSource::CsvRow(n) => Some(n),
        _ => None,
    }
}

fn resolve_targets(
    model: &PermissionModel,
    entry: &ChangeEntry,
    conflicts: &mut Vec<Conflict>,
) -> Option<Vec<HolderId>> {
    match &entry.targets {
        TargetSelection::All => Some(model.holder_ids()),
        TargetSelection::AllOfKind(kind) => Some(model.holder_ids_of_kind(*kind)),
        TargetSelection::Holders(ids) => {
            let mut resolved = Vec::with_capacity(ids.len());
            for id in ids {
                if model.contains(id) {
                    resolved.push(id.clone());
                } else {
                    conflicts.push(Conflict {
                        holder: Some(id.clone()),
                        object: entry.object.clone(),
                        field: entry.field.clone(),
                        row: row_of(entry.source),
                        message: "target not found in loaded metadata".into(),
                    });
                }
            }
            Some(resolved)
        }
    }
}

fn plan_field(
    entry: &ChangeEntry,
    holder_id: &HolderId,
    current: Option<FieldGrant>,
    requested: FieldGrant,
    auto_repair: bool,
    result: &mut PlanResult,
) {
    let before = current.unwrap_or_default();
    let mut requested = requested;

    if entry.formula && requested.editable {
        requested.editable = false;
        result.conflicts.push(Conflict {
            holder: Some(holder_id.clone()),
            object: entry.object.clone(),
            field: entry.field.clone(),
            row: row_of(entry.source),
            message: "formula fields are read-only; editable request downgraded".into(),
        });
    }

    let desired = if requested.is_consistent() {
        requested
    } else if auto_repair {
        requested.repaired()
    } else {
        result.conflicts.push(Conflict {
            holder: Some(holder_id.clone()),
            object: entry.object.clone(),
            field: entry.field.clone(),
            row: row_of(entry.source),
            message: "editable requires readable; excluded (auto-repair not requested)".into(),
        });
        return;
    };

    if before == desired {
        retract(result, holder_id, &entry.key());
        return;
    }
    push_mutation(result, Mutation {
        holder: holder_id.clone(),
        key: entry.key(),
        before: GrantValue::Field(before),
        after: GrantValue::Field(desired),
        source: entry.source,
    });
    if desired != requested {
        // Make the dependency upgrade visible in the plan
        push_mutation(result, Mutation {
            holder: holder_id.clone(),
            key: entry.key(),
            before: GrantValue::Field(requested),
            after: GrantValue::Field(desired),
            source: ChangeSource::AutoRepair,
        });
    }
}

fn plan_object(
    entry: &ChangeEntry,
    holder_id: &HolderId,
    current: Option<ObjectGrant>,
    requested: ObjectGrant,
    auto_repair: bool,
    result: &mut PlanResult,
) {
    let before = current.unwrap_or_default();
    let desired = if requested.is_consistent() {
        requested
    } else if auto_repair {
        requested.repaired()
    } else {
        result.conflicts.push(Conflict {
            holder: Some(holder_id.clone()),
            object: entry.object.clone(),
            field: None,
            row: row_of(entry.source),
            message:
                "permission combination violates the dependency chain; excluded (auto-repair not requested)"
                    .into(),
        });
        return;
    };

    if before == desired {
        retract(result, holder_id, &entry.key());
        return;
    }
    push_mutation(result, Mutation {
        holder: holder_id.clone(),
        key: entry.key(),
        before: GrantValue::Object(before),
        after: GrantValue::Object(desired),
        source: entry.source,
    });
    if desired != requested {
        push_mutation(result, Mutation {
            holder: holder_id.clone(),
            key: entry.key(),
            before: GrantValue::Object(requested),
            after: GrantValue::Object(desired),
            source: ChangeSource::AutoRepair,
        });
    }
}

/// Later entries targeting the same grant replace earlier ones
fn push_mutation(result: &mut PlanResult, mutation: Mutation) {
    if mutation.source != ChangeSource::AutoRepair {
        retract(result, &mutation.holder, &mutation.key);
    }
    result.mutations.push(mutation);
}

/// Drop any pending mutations for one grant; a later entry that restates
/// the current value cancels whatever an earlier entry planned for it
fn retract(result: &mut PlanResult, holder: &HolderId, key: &GrantKey) {
    result.mutations.retain(|m| !(m.holder == *holder && m.key == *key));
}
