//! Report generation: matrices, reverse lookup, effective access and
//! deterministic output.

use std::collections::BTreeMap;
use std::path::PathBuf;

use flskit::report::{effective_field_report, field_report, object_report, reverse_lookup};
use flskit::xml::Document;
use flskit::{FieldGrant, Holder, HolderId, ObjectGrant, PermissionModel};

fn holder(id: HolderId) -> Holder {
    let doc = Document::new(id.kind.root_tag());
    Holder {
        source_path: PathBuf::from(format!("{}{}", id.name, id.kind.suffix())),
        id,
        field_grants: BTreeMap::new(),
        object_grants: BTreeMap::new(),
        doc,
    }
}

/// Admin sees and edits Industry; Standard sees it; the permission set
/// has object-level overrides but no explicit FLS.
fn sample_model() -> PermissionModel {
    let mut admin = holder(HolderId::profile("Admin"));
    admin.field_grants.insert("Account.Industry".into(), FieldGrant::new(true, true));
    admin.object_grants.insert(
        "Account".into(),
        ObjectGrant { create: true, read: true, edit: true, delete: true, ..Default::default() },
    );

    let mut standard = holder(HolderId::profile("Standard"));
    standard.field_grants.insert("Account.Industry".into(), FieldGrant::new(true, false));

    let mut audit = holder(HolderId::permission_set("Audit_PS"));
    audit.object_grants.insert(
        "Account".into(),
        ObjectGrant { read: true, view_all: true, ..Default::default() },
    );

    let mut model = PermissionModel::new();
    model.insert(admin);
    model.insert(standard);
    model.insert(audit);
    model
}

fn scope() -> Vec<HolderId> {
    vec![
        HolderId::profile("Admin"),
        HolderId::profile("Standard"),
        HolderId::permission_set("Audit_PS"),
    ]
}

#[test]
fn field_report_shows_explicit_access_per_holder() {
    let model = sample_model();
    let fields = vec![("Account".to_string(), "Industry".to_string())];
    let table = field_report(&model, &scope(), &fields);

    assert_eq!(table.headers, vec!["ObjectName", "FieldName", "Admin", "Standard", "Audit_PS"]);
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0], vec!["Account", "Industry", "RW", "R-", "--"]);
}

#[test]
fn object_report_uses_the_short_permission_form() {
    let model = sample_model();
    let table = object_report(&model, &scope(), &["Account".to_string()]);

    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0], vec!["Account", "c r u d - -", "- - - - - -", "- r - - VA -"]);
}

#[test]
fn reverse_lookup_is_exhaustive_and_sorted() {
    let model = sample_model();
    let rows = reverse_lookup(&model, &scope(), "Account", "Industry");

    // One entry per holder in scope, profiles before permission sets,
    // names ascending; holders without an explicit grant are all-false.
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], (HolderId::profile("Admin"), true, true));
    assert_eq!(rows[1], (HolderId::profile("Standard"), true, false));
    assert_eq!(rows[2], (HolderId::permission_set("Audit_PS"), false, false));
}

#[test]
fn reverse_lookup_scope_can_be_a_subset() {
    let model = sample_model();
    let rows = reverse_lookup(&model, &[HolderId::profile("Standard")], "Account", "Industry");
    assert_eq!(rows, vec![(HolderId::profile("Standard"), true, false)]);
}

#[test]
fn effective_report_resolves_object_level_overrides() {
    let model = sample_model();
    let fields = vec![("Account".to_string(), "Industry".to_string())];
    let table = effective_field_report(&model, &scope(), &fields);

    // Audit_PS has no explicit FLS but viewAllRecords grants read
    assert_eq!(table.rows[0][4], "R- (via ViewAllRecords)");
    // Explicit grants are untouched
    assert_eq!(table.rows[0][2], "RW");
}

#[test]
fn modify_all_records_implies_read_and_edit() {
    let mut model = PermissionModel::new();
    let mut h = holder(HolderId::permission_set("Super_PS"));
    h.object_grants.insert(
        "Account".into(),
        ObjectGrant { read: true, view_all: true, modify_all: true, ..Default::default() },
    );
    model.insert(h);

    let fields = vec![("Account".to_string(), "Industry".to_string())];
    let table = effective_field_report(&model, &[HolderId::permission_set("Super_PS")], &fields);
    assert_eq!(table.rows[0][2], "RW (via ModifyAllRecords)");
}

#[test]
fn identical_scope_produces_identical_tables() {
    let model = sample_model();
    let fields = vec![
        ("Account".to_string(), "Industry".to_string()),
        ("Account".to_string(), "Phone".to_string()),
    ];
    let a = field_report(&model, &scope(), &fields);
    let b = field_report(&model, &scope(), &fields);
    assert_eq!(a, b);

    // Scope order does not matter; the table is sorted internally
    let mut reversed = scope();
    reversed.reverse();
    let c = field_report(&model, &reversed, &fields);
    assert_eq!(a, c);
}

#[test]
fn tables_export_to_csv() {
    let tmp = tempfile::TempDir::new().unwrap();
    let model = sample_model();
    let fields = vec![("Account".to_string(), "Industry".to_string())];
    let table = field_report(&model, &scope(), &fields);

    let path = tmp.path().join("report.csv");
    table.write_csv(&path).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("ObjectName,FieldName,Admin,Standard,Audit_PS"));
    assert!(content.contains("Account,Industry,RW,R-,--"));
}
