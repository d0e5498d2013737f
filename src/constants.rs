//! Metadata naming constants and access display codes

/// Salesforce metadata XML namespace
pub const SF_NAMESPACE: &str = "http://soap.sforce.com/2006/04/metadata";

// Metadata file suffixes
pub const PROFILE_SUFFIX: &str = ".profile-meta.xml";
pub const PERMISSIONSET_SUFFIX: &str = ".permissionset-meta.xml";
pub const FIELD_META_SUFFIX: &str = ".field-meta.xml";

// Component folders under the metadata base
pub const PROFILES_DIR: &str = "profiles";
pub const PERMISSIONSETS_DIR: &str = "permissionsets";
pub const OBJECTS_DIR: &str = "objects";

/// API version written into generated package.xml files
pub const API_VERSION: &str = "60.0";

/// Backup directory name under the tool files directory
pub const BACKUPS_DIR: &str = "fs_backups";

// Object permission tags, in platform declaration order
pub const OBJECT_PERM_TAGS: [&str; 6] = [
    "allowCreate",
    "allowRead",
    "allowEdit",
    "allowDelete",
    "viewAllRecords",
    "modifyAllRecords",
];

// Short display codes matching OBJECT_PERM_TAGS positionally
pub const OBJECT_PERM_SHORT: [&str; 6] = ["c", "r", "u", "d", "VA", "MA"];

// Access display codes for field-level security
pub const ACCESS_RW: &str = "RW";
pub const ACCESS_R_ONLY: &str = "R-";
pub const ACCESS_NONE: &str = "--";

/// Canonical ordering of top-level profile/permission-set elements.
/// New grant blocks are inserted at the position this order dictates.
pub const METADATA_TAG_ORDER: [&str; 24] = [
    "applicationVisibilities",
    "categoryGroupVisibilities",
    "classAccesses",
    "customMetadataTypeAccesses",
    "customPermissions",
    "customSettingAccesses",
    "externalCredentialPrincipalAccesses",
    "externalDataSourceAccesses",
    "fieldPermissions",
    "flowAccesses",
    "layoutAssignments",
    "loginFlows",
    "loginHours",
    "loginIpRanges",
    "objectPermissions",
    "pageAccesses",
    "profileActionOverrides",
    "recordTypeVisibilities",
    "tabSettings",
    "tabVisibilities",
    "userLicense",
    "userPermissions",
    "viewAllData",
    "modifyAllData",
];

/// Field types whose visibility is inherited or not managed through
/// field-level security; fields of these types are not eligible for edits.
pub const EXCLUDED_FIELD_TYPES: [&str; 7] = [
    "Lookup",
    "MasterDetail",
    "MetadataRelationship",
    "Summary",
    "Hierarchy",
    "ExternalLookup",
    "AutoNumber",
];

/// Format a readable/editable pair as its display code
pub fn access_display(readable: bool, editable: bool) -> &'static str {
    match (readable, editable) {
        (true, true) => ACCESS_RW,
        (true, false) => ACCESS_R_ONLY,
        (false, _) => ACCESS_NONE,
    }
}

/// Parse an access display code back into a readable/editable pair
pub fn parse_access_display(code: &str) -> Option<(bool, bool)> {
    match code.trim().to_ascii_uppercase().as_str() {
        ACCESS_RW => Some((true, true)),
        ACCESS_R_ONLY => Some((true, false)),
        ACCESS_NONE => Some((false, false)),
        _ => None,
    }
}

/// Position of a tag in the canonical ordering, if it has one
pub fn tag_order_index(tag: &str) -> Option<usize> {
    METADATA_TAG_ORDER.iter().position(|t| *t == tag)
}
