//! In-memory permission model: holders, grants, reverse indices

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{access_display, OBJECT_PERM_SHORT, OBJECT_PERM_TAGS};
use crate::error::{FlsError, Result};
use crate::xml::Document;

/// The two kinds of grant holders
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HolderKind {
    Profile,
    PermissionSet,
}

impl HolderKind {
    pub fn suffix(self) -> &'static str {
        match self {
            HolderKind::Profile => crate::constants::PROFILE_SUFFIX,
            HolderKind::PermissionSet => crate::constants::PERMISSIONSET_SUFFIX,
        }
    }

    pub fn dir(self) -> &'static str {
        match self {
            HolderKind::Profile => crate::constants::PROFILES_DIR,
            HolderKind::PermissionSet => crate::constants::PERMISSIONSETS_DIR,
        }
    }

    /// Root element name of this kind's metadata file
    pub fn root_tag(self) -> &'static str {
        match self {
            HolderKind::Profile => "Profile",
            HolderKind::PermissionSet => "PermissionSet",
        }
    }
}

impl fmt::Display for HolderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root_tag())
    }
}

/// Identity of a profile or permission set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HolderId {
    pub kind: HolderKind,
    pub name: String,
}

impl HolderId {
    pub fn profile(name: impl Into<String>) -> Self {
        HolderId { kind: HolderKind::Profile, name: name.into() }
    }

    pub fn permission_set(name: impl Into<String>) -> Self {
        HolderId { kind: HolderKind::PermissionSet, name: name.into() }
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Identity of one permission fact; `field` is absent for object grants
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GrantKey {
    pub object: String,
    pub field: Option<String>,
}

impl GrantKey {
    pub fn object(object: impl Into<String>) -> Self {
        GrantKey { object: object.into(), field: None }
    }

    pub fn field(object: impl Into<String>, field: impl Into<String>) -> Self {
        GrantKey { object: object.into(), field: Some(field.into()) }
    }

    /// Qualified `Object.Field` name for field keys
    pub fn full_field(&self) -> Option<String> {
        self.field.as_ref().map(|f| format!("{}.{}", self.object, f))
    }
}

impl fmt::Display for GrantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{}", self.object, field),
            None => f.write_str(&self.object),
        }
    }
}

/// Field-level security values for one field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGrant {
    pub readable: bool,
    pub editable: bool,
}

impl FieldGrant {
    pub fn new(readable: bool, editable: bool) -> Self {
        FieldGrant { readable, editable }
    }

    /// Editable access requires readable access
    pub fn is_consistent(self) -> bool {
        !self.editable || self.readable
    }

    /// Upgrade the weaker value to satisfy the dependency
    pub fn repaired(self) -> Self {
        FieldGrant { readable: self.readable || self.editable, editable: self.editable }
    }

    pub fn display(self) -> &'static str {
        access_display(self.readable, self.editable)
    }
}

/// Object-level permission values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectGrant {
    pub create: bool,
    pub read: bool,
    pub edit: bool,
    pub delete: bool,
    pub view_all: bool,
    pub modify_all: bool,
}

impl ObjectGrant {
    /// Flags in OBJECT_PERM_TAGS order
    pub fn flags(self) -> [bool; 6] {
        [self.create, self.read, self.edit, self.delete, self.view_all, self.modify_all]
    }

    pub fn from_flags(flags: [bool; 6]) -> Self {
        ObjectGrant {
            create: flags[0],
            read: flags[1],
            edit: flags[2],
            delete: flags[3],
            view_all: flags[4],
            modify_all: flags[5],
        }
    }

    /// Dependency chain: modifyAll => viewAll => read, and each of
    /// create/edit/delete => read
    pub fn is_consistent(self) -> bool {
        if self.modify_all && !self.view_all {
            return false;
        }
        if self.view_all && !self.read {
            return false;
        }
        if (self.create || self.edit || self.delete) && !self.read {
            return false;
        }
        true
    }

    /// Upgrade weaker values until the dependency chain holds
    pub fn repaired(self) -> Self {
        let mut g = self;
        if g.modify_all {
            g.view_all = true;
        }
        if g.view_all {
            g.read = true;
        }
        if g.create || g.edit || g.delete {
            g.read = true;
        }
        g
    }

    /// Short display string, e.g. `c r u d VA MA` with `-` for unset flags
    pub fn display_short(self) -> String {
        let flags = self.flags();
        let parts: Vec<&str> = (0..6)
            .map(|i| if flags[i] { OBJECT_PERM_SHORT[i] } else { "-" })
            .collect();
        parts.join(" ")
    }

    /// Parse the short display format produced by `display_short`.
    /// Each token must be the expected code or `-`.
    pub fn parse_short(s: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != OBJECT_PERM_TAGS.len() {
            return Err(format!(
                "expected {} permission tokens, found {} in '{}'",
                OBJECT_PERM_TAGS.len(),
                parts.len(),
                s.trim()
            ));
        }
        let mut flags = [false; 6];
        for (i, part) in parts.iter().enumerate() {
            if *part == OBJECT_PERM_SHORT[i] {
                flags[i] = true;
            } else if *part != "-" {
                return Err(format!(
                    "unrecognized token '{}' for {}; expected '{}' or '-'",
                    part, OBJECT_PERM_TAGS[i], OBJECT_PERM_SHORT[i]
                ));
            }
        }
        Ok(ObjectGrant::from_flags(flags))
    }
}

/// A profile or permission set with its parsed grants and source document
#[derive(Debug, Clone)]
pub struct Holder {
    pub id: HolderId,
    pub source_path: PathBuf,
    /// Keyed by qualified `Object.Field` name
    pub field_grants: BTreeMap<String, FieldGrant>,
    pub object_grants: BTreeMap<String, ObjectGrant>,
    /// Full parsed file, including elements the model does not interpret
    pub doc: Document,
}

impl Holder {
    /// Explicit field grant, if one is recorded
    pub fn field_grant(&self, full_field: &str) -> Option<FieldGrant> {
        self.field_grants.get(full_field).copied()
    }

    pub fn object_grant(&self, object: &str) -> Option<ObjectGrant> {
        self.object_grants.get(object).copied()
    }

    /// Effective field access: explicit FLS combined with object-level
    /// overrides (modifyAllRecords grants read+edit, viewAllRecords read)
    pub fn effective_field_access(&self, object: &str, full_field: &str) -> FieldGrant {
        let explicit = self.field_grant(full_field).unwrap_or_default();
        let mut readable = explicit.readable;
        let mut editable = explicit.editable;
        if let Some(og) = self.object_grant(object) {
            if og.modify_all {
                readable = true;
                editable = true;
            } else if og.view_all {
                readable = true;
            }
        }
        if editable {
            readable = true;
        }
        FieldGrant { readable, editable }
    }

    /// Org-wide data access override, if enabled on this holder.
    /// Profiles declare these as userPermissions entries; permission sets
    /// as top-level boolean tags.
    pub fn system_override(&self) -> Option<&'static str> {
        match self.id.kind {
            HolderKind::Profile => {
                for name in ["ModifyAllData", "ViewAllData"] {
                    let enabled = self.doc.root.elements().any(|e| {
                        e.name == "userPermissions"
                            && e.child_text("name") == Some(name)
                            && e.bool_child("enabled")
                    });
                    if enabled {
                        return Some(if name == "ModifyAllData" {
                            "Modify All Data"
                        } else {
                            "View All Data"
                        });
                    }
                }
                None
            }
            HolderKind::PermissionSet => {
                if self.doc.root.bool_child("modifyAllData") {
                    Some("Modify All Data")
                } else if self.doc.root.bool_child("viewAllData") {
                    Some("View All Data")
                } else {
                    None
                }
            }
        }
    }
}

/// Aggregate of all loaded holders with reverse lookup indices.
/// Rebuilt fresh from files on every run; mutated only through the
/// writer's apply path.
#[derive(Debug, Default)]
pub struct PermissionModel {
    holders: BTreeMap<HolderId, Holder>,
    by_object: BTreeMap<String, BTreeSet<HolderId>>,
    by_field: BTreeMap<(String, String), BTreeSet<HolderId>>,
}

impl PermissionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a holder, indexing its grants
    pub fn insert(&mut self, holder: Holder) {
        let id = holder.id.clone();
        for full_field in holder.field_grants.keys() {
            if let Some((object, field)) = full_field.split_once('.') {
                self.by_field
                    .entry((object.to_string(), field.to_string()))
                    .or_default()
                    .insert(id.clone());
                self.by_object.entry(object.to_string()).or_default().insert(id.clone());
            }
        }
        for object in holder.object_grants.keys() {
            self.by_object.entry(object.clone()).or_default().insert(id.clone());
        }
        self.holders.insert(id, holder);
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    /// All holders, ordered by id
    pub fn holders(&self) -> impl Iterator<Item = &Holder> {
        self.holders.values()
    }

    pub fn holder_ids(&self) -> Vec<HolderId> {
        self.holders.keys().cloned().collect()
    }

    pub fn holder_ids_of_kind(&self, kind: HolderKind) -> Vec<HolderId> {
        self.holders.keys().filter(|id| id.kind == kind).cloned().collect()
    }

    pub fn contains(&self, id: &HolderId) -> bool {
        self.holders.contains_key(id)
    }

    pub fn holder(&self, id: &HolderId) -> Result<&Holder> {
        self.holders.get(id).ok_or_else(|| FlsError::HolderNotFound(id.to_string()))
    }

    pub(crate) fn holder_mut(&mut self, id: &HolderId) -> Result<&mut Holder> {
        self.holders.get_mut(id).ok_or_else(|| FlsError::HolderNotFound(id.to_string()))
    }

    /// Reverse lookup: holders with an explicit grant on this field
    pub fn grants_for_field(&self, object: &str, field: &str) -> Vec<(HolderId, FieldGrant)> {
        let full = format!("{}.{}", object, field);
        let Some(ids) = self.by_field.get(&(object.to_string(), field.to_string())) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                let holder = self.holders.get(id)?;
                holder.field_grant(&full).map(|g| (id.clone(), g))
            })
            .collect()
    }

    /// Reverse lookup: holders with an explicit grant on this object
    pub fn grants_for_object(&self, object: &str) -> Vec<(HolderId, ObjectGrant)> {
        let Some(ids) = self.by_object.get(object) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                let holder = self.holders.get(id)?;
                holder.object_grant(object).map(|g| (id.clone(), g))
            })
            .collect()
    }

    /// Record a new field grant value, keeping the reverse indices in sync
    pub(crate) fn record_field_grant(&mut self, id: &HolderId, key: &GrantKey, grant: FieldGrant) {
        if let Some(field) = &key.field {
            if let Some(holder) = self.holders.get_mut(id) {
                let full = format!("{}.{}", key.object, field);
                holder.field_grants.insert(full, grant);
            }
            self.by_field
                .entry((key.object.clone(), field.clone()))
                .or_default()
                .insert(id.clone());
            self.by_object.entry(key.object.clone()).or_default().insert(id.clone());
        }
    }

    /// Record a new object grant value, keeping the reverse indices in sync
    pub(crate) fn record_object_grant(&mut self, id: &HolderId, key: &GrantKey, grant: ObjectGrant) {
        if let Some(holder) = self.holders.get_mut(id) {
            holder.object_grants.insert(key.object.clone(), grant);
        }
        self.by_object.entry(key.object.clone()).or_default().insert(id.clone());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_grant_dependency() {
        assert!(FieldGrant::new(true, true).is_consistent());
        assert!(FieldGrant::new(false, false).is_consistent());
        assert!(!FieldGrant::new(false, true).is_consistent());
        assert_eq!(FieldGrant::new(false, true).repaired(), FieldGrant::new(true, true));
    }

    #[test]
    fn object_grant_dependency_chain() {
        let g = ObjectGrant { modify_all: true, ..Default::default() };
        assert!(!g.is_consistent());
        let r = g.repaired();
        assert!(r.view_all && r.read && r.modify_all);
        assert!(r.is_consistent());

        let g = ObjectGrant { create: true, ..Default::default() };
        assert!(!g.is_consistent());
        assert!(g.repaired().read);
    }

    #[test]
    fn object_grant_short_display_round_trip() {
        let g = ObjectGrant { create: true, read: true, view_all: true, ..Default::default() };
        assert_eq!(g.display_short(), "c r - - VA -");
        assert_eq!(ObjectGrant::parse_short("c r - - VA -").unwrap(), g);
        assert!(ObjectGrant::parse_short("c r").is_err());
        assert!(ObjectGrant::parse_short("x r - - VA -").is_err());
    }

    #[test]
    fn holder_id_ordering_is_kind_then_name() {
        let mut ids = vec![
            HolderId::permission_set("Alpha"),
            HolderId::profile("Zeta"),
            HolderId::profile("Admin"),
        ];
        ids.sort();
        assert_eq!(ids[0], HolderId::profile("Admin"));
        assert_eq!(ids[1], HolderId::profile("Zeta"));
        assert_eq!(ids[2], HolderId::permission_set("Alpha"));
    }
}
