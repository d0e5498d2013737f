//! Deployment package.xml generation

use crate::constants::API_VERSION;
use crate::xml::{Document, Element};

/// Build a package.xml naming the given profiles and permission sets.
/// Members are sorted and deduplicated; returns None when there is
/// nothing to deploy.
pub fn generate_package(profiles: &[String], permission_sets: &[String]) -> Option<Document> {
    if profiles.is_empty() && permission_sets.is_empty() {
        return None;
    }
    let mut doc = Document::new("Package");
    for (members, type_name) in [(profiles, "Profile"), (permission_sets, "PermissionSet")] {
        if members.is_empty() {
            continue;
        }
        let mut sorted: Vec<&String> = members.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut types = Element::new("types");
        for member in sorted {
            types.push_element(Element::with_text("members", member.clone()));
        }
        types.push_element(Element::with_text("name", type_name));
        doc.root.push_element(types);
    }
    doc.root.push_element(Element::with_text("version", API_VERSION));
    Some(doc)
}
