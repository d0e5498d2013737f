//! Flskit - bulk field security and object permission management
//!
//! Reads Salesforce profile and permission-set metadata into an
//! addressable permission model, plans and applies bulk field-level
//! security and object CRUD changes (manual or CSV-driven), reports on
//! current access including reverse lookup, and keeps every apply
//! reversible through operation-scoped backups.
//!
//! The planner is pure; all file I/O lives in the reader, writer and
//! backup manager, coordinated by snapshot-before-write ordering.

pub mod backup;
pub mod bulk;
pub mod constants;
pub mod error;
pub mod model;
pub mod package;
pub mod planner;
pub mod reader;
pub mod report;
pub mod writer;
pub mod xml;

pub use backup::{BackupManager, BackupRecord, OperationId, RollbackResult};
pub use bulk::{fls_request_from_csv, object_request_from_csv};
pub use error::{FlsError, Result};
pub use model::{
    FieldGrant, GrantKey, Holder, HolderId, HolderKind, ObjectGrant, PermissionModel,
};
pub use package::generate_package;
pub use planner::{
    plan, ChangeEntry, ChangeRequest, ChangeSource, Conflict, GrantValue, Mutation, PlanResult,
    TargetSelection,
};
pub use reader::{
    find_metadata_base, list_fields, list_objects, list_permission_sets, list_profiles,
    parse_holder, read_model, FieldInfo, KindFilter, LoadIssue, ObjectCatalog,
};
pub use report::{
    effective_field_report, field_report, object_report, reverse_lookup, Table,
};
pub use writer::{apply, ApplyResult};
