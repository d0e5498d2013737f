//! Metadata discovery and parsing (read-only, never mutates files)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::constants::{
    EXCLUDED_FIELD_TYPES, FIELD_META_SUFFIX, OBJECTS_DIR, OBJECT_PERM_TAGS, PERMISSIONSETS_DIR,
    PROFILES_DIR,
};
use crate::error::{FlsError, Result};
use crate::model::{FieldGrant, Holder, HolderId, HolderKind, ObjectGrant, PermissionModel};
use crate::xml::Document;

/// Which holder kinds to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Profiles,
    PermissionSets,
    Both,
}

impl KindFilter {
    fn accepts(self, kind: HolderKind) -> bool {
        match self {
            KindFilter::Profiles => kind == HolderKind::Profile,
            KindFilter::PermissionSets => kind == HolderKind::PermissionSet,
            KindFilter::Both => true,
        }
    }
}

/// A file that failed to load; the rest of the model is unaffected
#[derive(Debug)]
pub struct LoadIssue {
    pub path: PathBuf,
    pub error: FlsError,
}

/// Locate the metadata base directory: a directory containing `objects/`
/// and at least one of `profiles/` or `permissionsets/`.
pub fn find_metadata_base(project_root: &Path, override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(base) = override_path {
        if is_metadata_base(base) {
            return Ok(base.to_path_buf());
        }
        return Err(FlsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("invalid metadata override path: {}", base.display()),
        )));
    }
    for candidate in [
        project_root.join("force-app").join("main").join("default"),
        project_root.join("mdapioutput"),
        project_root.join("src"),
    ] {
        if is_metadata_base(&candidate) {
            return Ok(candidate);
        }
    }
    // Fall back to searching for any objects/ directory with siblings
    if let Some(found) = search_for_base(project_root) {
        return Ok(found);
    }
    Err(FlsError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no metadata folder found under {}", project_root.display()),
    )))
}

fn is_metadata_base(base: &Path) -> bool {
    base.join(OBJECTS_DIR).is_dir()
        && (base.join(PROFILES_DIR).is_dir() || base.join(PERMISSIONSETS_DIR).is_dir())
}

fn search_for_base(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name() == Some(std::ffi::OsStr::new(OBJECTS_DIR)) && is_metadata_base(dir) {
                return Some(dir.to_path_buf());
            }
            subdirs.push(path);
        }
    }
    subdirs.sort();
    subdirs.iter().find_map(|d| search_for_base(d))
}

/// List component names of one kind, sorted
fn list_components(meta: &Path, kind: HolderKind) -> Result<Vec<String>> {
    let dir = meta.join(kind.dir());
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(name) = file_name.strip_suffix(kind.suffix()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

pub fn list_profiles(meta: &Path) -> Result<Vec<String>> {
    list_components(meta, HolderKind::Profile)
}

pub fn list_permission_sets(meta: &Path) -> Result<Vec<String>> {
    list_components(meta, HolderKind::PermissionSet)
}

/// List object directory names, sorted
pub fn list_objects(meta: &Path) -> Result<Vec<String>> {
    let dir = meta.join(OBJECTS_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Read the model from a metadata directory: one holder per discoverable
/// profile/permission-set file. Files that fail to parse are reported as
/// issues and skipped; every other holder still loads.
pub fn read_model(meta: &Path, filter: KindFilter) -> Result<(PermissionModel, Vec<LoadIssue>)> {
    let mut model = PermissionModel::new();
    let mut issues = Vec::new();
    for kind in [HolderKind::Profile, HolderKind::PermissionSet] {
        if !filter.accepts(kind) {
            continue;
        }
        for name in list_components(meta, kind)? {
            let path = meta.join(kind.dir()).join(format!("{}{}", name, kind.suffix()));
            match parse_holder(&path, HolderId { kind, name }) {
                Ok(holder) => model.insert(holder),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable holder file");
                    issues.push(LoadIssue { path, error });
                }
            }
        }
    }
    debug!(holders = model.len(), issues = issues.len(), "model loaded");
    Ok((model, issues))
}

/// Parse a single profile/permission-set file into a holder
pub fn parse_holder(path: &Path, id: HolderId) -> Result<Holder> {
    let doc = Document::load(path)?;
    let mut field_grants = BTreeMap::new();
    let mut object_grants = BTreeMap::new();

    for elem in doc.root.elements() {
        match elem.name.as_str() {
            "fieldPermissions" => {
                let field = elem.child_text("field").map(str::trim).filter(|s| !s.is_empty());
                let Some(field) = field else {
                    return Err(FlsError::UnexpectedSchema {
                        path: path.to_path_buf(),
                        detail: "fieldPermissions entry without a field API name".into(),
                    });
                };
                let grant = FieldGrant {
                    readable: elem.bool_child("readable"),
                    editable: elem.bool_child("editable"),
                };
                if field_grants.insert(field.to_string(), grant).is_some() {
                    warn!(holder = %id, field, "duplicate fieldPermissions entry; last wins");
                }
            }
            "objectPermissions" => {
                let object = elem.child_text("object").map(str::trim).filter(|s| !s.is_empty());
                let Some(object) = object else {
                    return Err(FlsError::UnexpectedSchema {
                        path: path.to_path_buf(),
                        detail: "objectPermissions entry without an object API name".into(),
                    });
                };
                let mut flags = [false; 6];
                for (i, tag) in OBJECT_PERM_TAGS.iter().enumerate() {
                    flags[i] = elem.bool_child(tag);
                }
                if object_grants.insert(object.to_string(), ObjectGrant::from_flags(flags)).is_some()
                {
                    warn!(holder = %id, object, "duplicate objectPermissions entry; last wins");
                }
            }
            // Everything else is preserved opaquely in the document
            _ => {}
        }
    }

    Ok(Holder { id, source_path: path.to_path_buf(), field_grants, object_grants, doc })
}

// ============================================================================
// Object/field catalog
// ============================================================================

/// A field eligible for field-level security management
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: String,
    pub formula: bool,
}

/// Eligible fields per object, read from the objects/ directory
#[derive(Debug, Default)]
pub struct ObjectCatalog {
    fields: BTreeMap<String, Vec<FieldInfo>>,
}

impl ObjectCatalog {
    /// Load the catalog for every object under the metadata base
    pub fn load(meta: &Path) -> Result<Self> {
        let mut fields = BTreeMap::new();
        for object in list_objects(meta)? {
            fields.insert(object.clone(), list_fields(meta, &object)?);
        }
        Ok(ObjectCatalog { fields })
    }

    pub fn objects(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn fields(&self, object: &str) -> &[FieldInfo] {
        self.fields.get(object).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn field(&self, object: &str, field: &str) -> Option<&FieldInfo> {
        self.fields(object).iter().find(|f| f.name == field)
    }

    /// Formula fields are readable at most; they can never be editable
    pub fn is_formula(&self, object: &str, field: &str) -> bool {
        self.field(object, field).map(|f| f.formula).unwrap_or(false)
    }
}

/// List the eligible fields of one object, with their types.
/// Relationship/rollup/auto-number types and required fields are excluded;
/// formula fields are included but flagged.
pub fn list_fields(meta: &Path, object: &str) -> Result<Vec<FieldInfo>> {
    let dir = meta.join(OBJECTS_DIR).join(object).join("fields");
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut result = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(name) = file_name.strip_suffix(FIELD_META_SUFFIX) else {
            continue;
        };
        let doc = match Document::load(&entry.path()) {
            Ok(doc) => doc,
            Err(error) => {
                warn!(path = %entry.path().display(), %error, "skipping unparseable field file");
                continue;
            }
        };
        let formula = doc.root.child("formula").is_some();
        let field_type = if formula {
            "Formula".to_string()
        } else {
            doc.root.child_text("type").unwrap_or("Unknown").to_string()
        };
        if !formula {
            if EXCLUDED_FIELD_TYPES.contains(&field_type.as_str()) {
                continue;
            }
            // Required fields are always visible and editable
            if doc.root.bool_child("required") {
                continue;
            }
        }
        result.push(FieldInfo { name: name.to_string(), field_type, formula });
    }
    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}
