//! Planning semantics: diffing, idempotence, dependency invariants,
//! auto-repair and target resolution. Planning does no I/O, so these
//! tests build the model directly from documents.

use std::collections::BTreeMap;
use std::path::PathBuf;

use flskit::planner::{plan, ChangeEntry, ChangeRequest, ChangeSource, TargetSelection};
use flskit::xml::Document;
use flskit::{
    FieldGrant, GrantValue, Holder, HolderId, HolderKind, ObjectGrant, PermissionModel,
};

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

fn holder_with_field(id: HolderId, full_field: &str, grant: FieldGrant) -> Holder {
    let mut h = holder(id);
    h.field_grants.insert(full_field.to_string(), grant);
    h
}

fn model_of(holders: Vec<Holder>) -> PermissionModel {
    let mut model = PermissionModel::new();
    for h in holders {
        model.insert(h);
    }
    model
}

fn fls_entry(target: HolderId, grant: FieldGrant, source: ChangeSource) -> ChangeEntry {
    ChangeEntry::field_security(
        TargetSelection::Holders(vec![target]),
        "Account",
        "Industry",
        grant,
        source,
    )
}

#[test]
fn absent_grant_diffs_against_all_false_baseline() {
    let admin = HolderId::profile("Admin");
    let model = model_of(vec![holder(admin.clone())]);

    let mut request = ChangeRequest::new();
    request.push(fls_entry(admin.clone(), FieldGrant::new(true, true), ChangeSource::Manual));

    let result = plan(&model, &request);
    assert!(result.conflicts.is_empty());
    assert_eq!(result.mutations.len(), 1);
    let m = &result.mutations[0];
    assert_eq!(m.holder, admin);
    assert_eq!(m.before, GrantValue::Field(FieldGrant::default()));
    assert_eq!(m.after, GrantValue::Field(FieldGrant::new(true, true)));
}

#[test]
fn matching_state_plans_nothing() {
    let admin = HolderId::profile("Admin");
    let model = model_of(vec![holder_with_field(
        admin.clone(),
        "Account.Industry",
        FieldGrant::new(true, true),
    )]);

    let mut request = ChangeRequest::new();
    request.push(fls_entry(admin, FieldGrant::new(true, true), ChangeSource::Manual));

    let result = plan(&model, &request);
    assert!(result.is_empty());
    assert!(result.conflicts.is_empty());
}

#[test]
fn editable_without_readable_is_a_conflict_without_auto_repair() {
    let user = HolderId::profile("Standard User");
    let model = model_of(vec![holder(user.clone())]);

    let mut request = ChangeRequest::new();
    request.push(fls_entry(user.clone(), FieldGrant::new(false, true), ChangeSource::CsvRow(3)));

    let result = plan(&model, &request);
    assert!(result.mutations.is_empty());
    assert_eq!(result.conflicts.len(), 1);
    let c = &result.conflicts[0];
    assert_eq!(c.holder.as_ref(), Some(&user));
    assert_eq!(c.row, Some(3));
    assert_eq!(c.object, "Account");
    assert_eq!(c.field.as_deref(), Some("Industry"));
}

#[test]
fn auto_repair_upgrades_and_records_the_repair() {
    let user = HolderId::profile("Standard User");
    let model = model_of(vec![holder(user.clone())]);

    let mut request = ChangeRequest::new().with_auto_repair();
    request.push(fls_entry(user.clone(), FieldGrant::new(false, true), ChangeSource::Manual));

    let result = plan(&model, &request);
    assert_eq!(result.mutations.len(), 2);
    assert_eq!(result.mutations[0].after, GrantValue::Field(FieldGrant::new(true, true)));
    assert_eq!(result.mutations[0].source, ChangeSource::Manual);
    assert_eq!(result.mutations[1].source, ChangeSource::AutoRepair);
    assert_eq!(result.mutations[1].before, GrantValue::Field(FieldGrant::new(false, true)));
    assert_eq!(result.mutations[1].after, GrantValue::Field(FieldGrant::new(true, true)));
    // Every planned field end state honors editable => readable
    for m in &result.mutations {
        if let GrantValue::Field(g) = m.after {
            assert!(g.is_consistent());
        }
    }
}

#[test]
fn object_dependency_chain_is_validated() {
    let admin = HolderId::profile("Admin");
    let model = model_of(vec![holder(admin.clone())]);

    // modifyAll without viewAll/read
    let requested = ObjectGrant { modify_all: true, ..Default::default() };
    let mut request = ChangeRequest::new();
    request.push(ChangeEntry::object_permissions(
        TargetSelection::Holders(vec![admin.clone()]),
        "Account",
        requested,
        ChangeSource::Manual,
    ));
    let result = plan(&model, &request);
    assert!(result.mutations.is_empty());
    assert_eq!(result.conflicts.len(), 1);

    // Same request with auto-repair grants the chain
    let mut request = ChangeRequest::new().with_auto_repair();
    request.push(ChangeEntry::object_permissions(
        TargetSelection::Holders(vec![admin]),
        "Account",
        requested,
        ChangeSource::Manual,
    ));
    let result = plan(&model, &request);
    assert_eq!(result.mutations.len(), 2);
    let GrantValue::Object(applied) = result.mutations[0].after else {
        panic!("expected object grant");
    };
    assert!(applied.modify_all && applied.view_all && applied.read);
}

#[test]
fn create_implies_read() {
    let admin = HolderId::profile("Admin");
    let model = model_of(vec![holder(admin.clone())]);
    let requested = ObjectGrant { create: true, ..Default::default() };

    let mut request = ChangeRequest::new();
    request.push(ChangeEntry::object_permissions(
        TargetSelection::Holders(vec![admin]),
        "Account",
        requested,
        ChangeSource::Manual,
    ));
    let result = plan(&model, &request);
    assert!(result.mutations.is_empty());
    assert_eq!(result.conflicts.len(), 1);
}

#[test]
fn conflicts_do_not_abort_unaffected_mutations() {
    let admin = HolderId::profile("Admin");
    let user = HolderId::profile("Standard User");
    let model = model_of(vec![holder(admin.clone()), holder(user.clone())]);

    let mut request = ChangeRequest::new();
    // Bad for user, fine for admin
    request.push(fls_entry(user, FieldGrant::new(false, true), ChangeSource::CsvRow(1)));
    request.push(fls_entry(admin.clone(), FieldGrant::new(true, false), ChangeSource::CsvRow(2)));

    let result = plan(&model, &request);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.mutations.len(), 1);
    assert_eq!(result.mutations[0].holder, admin);
}

#[test]
fn later_entries_win_over_earlier_for_the_same_grant() {
    let admin = HolderId::profile("Admin");
    let model = model_of(vec![holder(admin.clone())]);

    let mut request = ChangeRequest::new();
    request.push(fls_entry(admin.clone(), FieldGrant::new(true, true), ChangeSource::CsvRow(1)));
    request.push(fls_entry(admin, FieldGrant::new(true, false), ChangeSource::Manual));

    let result = plan(&model, &request);
    assert_eq!(result.mutations.len(), 1);
    assert_eq!(result.mutations[0].after, GrantValue::Field(FieldGrant::new(true, false)));
    assert_eq!(result.mutations[0].source, ChangeSource::Manual);
}

#[test]
fn restating_the_current_value_cancels_an_earlier_entry() {
    let admin = HolderId::profile("Admin");
    let model = model_of(vec![holder(admin.clone())]);

    let mut request = ChangeRequest::new();
    request.push(fls_entry(admin.clone(), FieldGrant::new(true, true), ChangeSource::CsvRow(1)));
    // The later entry matches the absent-grant baseline, so nothing
    // should remain planned for this grant
    request.push(fls_entry(admin, FieldGrant::default(), ChangeSource::Manual));

    let result = plan(&model, &request);
    assert!(result.is_empty());
}

#[test]
fn unknown_target_is_a_conflict_not_an_error() {
    let model = model_of(vec![holder(HolderId::profile("Admin"))]);

    let mut request = ChangeRequest::new();
    request.push(fls_entry(
        HolderId::profile("DoesNotExist"),
        FieldGrant::new(true, false),
        ChangeSource::Manual,
    ));

    let result = plan(&model, &request);
    assert!(result.mutations.is_empty());
    assert_eq!(result.conflicts.len(), 1);
    assert!(result.conflicts[0].message.contains("not found"));
}

#[test]
fn all_of_kind_targets_every_holder_of_that_kind() {
    let model = model_of(vec![
        holder(HolderId::profile("Admin")),
        holder(HolderId::profile("Standard User")),
        holder(HolderId::permission_set("Audit_PS")),
    ]);

    let mut request = ChangeRequest::new();
    request.push(ChangeEntry::field_security(
        TargetSelection::AllOfKind(HolderKind::Profile),
        "Account",
        "Industry",
        FieldGrant::new(true, false),
        ChangeSource::Manual,
    ));

    let result = plan(&model, &request);
    assert_eq!(result.mutations.len(), 2);
    assert!(result.mutations.iter().all(|m| m.holder.kind == HolderKind::Profile));
}

#[test]
fn formula_fields_are_never_planned_editable() {
    let admin = HolderId::profile("Admin");
    let model = model_of(vec![holder(admin.clone())]);

    let mut entry = ChangeEntry::field_security(
        TargetSelection::Holders(vec![admin]),
        "Account",
        "Margin__c",
        FieldGrant::new(true, true),
        ChangeSource::Manual,
    );
    entry.formula = true;
    let mut request = ChangeRequest::new();
    request.push(entry);

    let result = plan(&model, &request);
    assert_eq!(result.mutations.len(), 1);
    assert_eq!(result.mutations[0].after, GrantValue::Field(FieldGrant::new(true, false)));
    assert_eq!(result.conflicts.len(), 1);
    assert!(result.conflicts[0].message.contains("read-only"));
}

#[test]
fn system_override_produces_an_advisory_conflict() {
    let admin = HolderId::profile("Admin");
    let mut h = holder(admin.clone());
    let src = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Profile xmlns=\"http://soap.sforce.com/2006/04/metadata\">\n    <userPermissions>\n        <enabled>true</enabled>\n        <name>ModifyAllData</name>\n    </userPermissions>\n</Profile>\n";
    h.doc = Document::parse_str(src).unwrap();
    let model = model_of(vec![h]);

    let mut request = ChangeRequest::new();
    request.push(fls_entry(admin.clone(), FieldGrant::new(true, false), ChangeSource::Manual));
    request.push(fls_entry(admin, FieldGrant::new(true, true), ChangeSource::Manual));

    let result = plan(&model, &request);
    // The mutation still proceeds; the override is advisory and warned once
    assert_eq!(result.mutations.len(), 1);
    assert_eq!(result.conflicts.len(), 1);
    assert!(result.conflicts[0].message.contains("Modify All Data"));
}

#[test]
fn carried_conflicts_surface_in_the_plan() {
    let model = model_of(vec![holder(HolderId::profile("Admin"))]);
    let mut request = ChangeRequest::new();
    request.carried_conflicts.push(flskit::Conflict {
        holder: None,
        object: "Account".into(),
        field: None,
        row: Some(7),
        message: "missing ObjectName".into(),
    });

    let result = plan(&model, &request);
    assert!(result.mutations.is_empty());
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].row, Some(7));
}
