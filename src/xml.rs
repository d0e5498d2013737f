//! Element-tree document model over quick-xml.
//!
//! Metadata files are parsed into a plain tree so that elements the grant
//! model does not understand survive a read/mutate/write cycle untouched.
//! Serialization is canonical: XML declaration, four-space indent, text
//! content inline, trailing newline.

use std::io::Write as _;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{FlsError, Result};

/// One XML element: name, attributes, ordered children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

/// A child node: nested element or text content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Elem(Element),
    Text(String),
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element { name: name.into(), attrs: Vec::new(), children: Vec::new() }
    }

    /// Leaf element containing only text
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut e = Element::new(name);
        e.children.push(Node::Text(text.into()));
        e
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(a) = self.attrs.iter_mut().find(|(k, _)| *k == key) {
            a.1 = value.into();
        } else {
            self.attrs.push((key, value.into()));
        }
    }

    /// Concatenated text content of this element
    pub fn text(&self) -> Option<&str> {
        self.children.iter().find_map(|n| match n {
            Node::Text(t) => Some(t.as_str()),
            Node::Elem(_) => None,
        })
    }

    /// Replace text content, preserving element children
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.retain(|n| matches!(n, Node::Elem(_)));
        self.children.insert(0, Node::Text(text.into()));
    }

    /// Child elements, in document order
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Elem(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Elem(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.name == name)
    }

    /// Text content of the first child element with the given name
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|e| e.text())
    }

    /// True when the named child exists with text content "true"
    pub fn bool_child(&self, name: &str) -> bool {
        self.child_text(name).map(str::trim) == Some("true")
    }

    /// Set the named child's text, creating the child if absent (appended)
    pub fn set_child_text(&mut self, name: &str, text: impl Into<String>) {
        match self.child_mut(name) {
            Some(c) => c.set_text(text),
            None => self.children.push(Node::Elem(Element::with_text(name, text))),
        }
    }

    pub fn push_element(&mut self, elem: Element) {
        self.children.push(Node::Elem(elem));
    }

    /// Insert an element so it becomes the idx-th child *element*
    pub fn insert_element(&mut self, idx: usize, elem: Element) {
        let mut seen = 0usize;
        for (pos, node) in self.children.iter().enumerate() {
            if matches!(node, Node::Elem(_)) {
                if seen == idx {
                    self.children.insert(pos, Node::Elem(elem));
                    return;
                }
                seen += 1;
            }
        }
        self.children.push(Node::Elem(elem));
    }

    /// Remove child elements matching the predicate, returning the count
    pub fn remove_elements<F: Fn(&Element) -> bool>(&mut self, pred: F) -> usize {
        let before = self.children.len();
        self.children.retain(|n| match n {
            Node::Elem(e) => !pred(e),
            Node::Text(_) => true,
        });
        before - self.children.len()
    }
}

/// A parsed metadata document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    /// New document with an empty namespaced root
    pub fn new(root_name: impl Into<String>) -> Self {
        let mut root = Element::new(root_name);
        root.set_attr("xmlns", crate::constants::SF_NAMESPACE);
        Document { root }
    }

    /// Parse from a string. The error is a parse detail message; callers
    /// attach the file path.
    pub fn parse_str(src: &str) -> std::result::Result<Document, String> {
        let mut reader = Reader::from_str(src);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        loop {
            match reader.read_event().map_err(|e| e.to_string())? {
                Event::Start(e) => {
                    stack.push(element_from_start(&e)?);
                }
                Event::Empty(e) => {
                    let elem = element_from_start(&e)?;
                    attach(&mut stack, &mut root, elem)?;
                }
                Event::End(_) => {
                    let elem = stack.pop().ok_or("unbalanced closing tag")?;
                    attach(&mut stack, &mut root, elem)?;
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| e.to_string())?;
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(Node::Text(trimmed.to_string())),
                            None => return Err("text content outside of root element".into()),
                        }
                    }
                }
                Event::CData(t) => {
                    let text = String::from_utf8_lossy(&t).into_owned();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Text(text)),
                        None => return Err("cdata outside of root element".into()),
                    }
                }
                Event::Eof => break,
                // Declaration, comments, processing instructions and
                // doctypes are not part of the modeled document.
                _ => {}
            }
        }
        if !stack.is_empty() {
            return Err("unclosed element at end of input".into());
        }
        root.ok_or_else(|| "no root element".into()).map(|root| Document { root })
    }

    /// Load and parse a file
    pub fn load(path: &Path) -> Result<Document> {
        let src = std::fs::read_to_string(path)?;
        Document::parse_str(&src).map_err(|detail| FlsError::MalformedMetadata {
            path: path.to_path_buf(),
            detail,
        })
    }

    /// Serialize in the canonical format
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(into_io)?;
        write_element(&mut writer, &self.root)?;
        let mut out = writer.into_inner();
        out.write_all(b"\n")?;
        String::from_utf8(out)
            .map_err(|e| FlsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, elem: Element) -> std::result::Result<(), String> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Elem(elem)),
        None => {
            if root.is_some() {
                return Err("multiple root elements".into());
            }
            *root = Some(elem);
        }
    }
    Ok(())
}

fn element_from_start(e: &BytesStart<'_>) -> std::result::Result<Element, String> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut elem = Element::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        elem.attrs.push((key, value));
    }
    Ok(elem)
}

fn write_element(writer: &mut Writer<Vec<u8>>, elem: &Element) -> Result<()> {
    let mut start = BytesStart::new(elem.name.as_str());
    for (k, v) in &elem.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if elem.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(into_io)?;
        return Ok(());
    }
    writer.write_event(Event::Start(start)).map_err(into_io)?;
    for child in &elem.children {
        match child {
            Node::Elem(e) => write_element(writer, e)?,
            Node::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(into_io)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(elem.name.as_str())))
        .map_err(into_io)?;
    Ok(())
}

fn into_io(e: quick_xml::Error) -> FlsError {
    FlsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<Profile xmlns=\"http://soap.sforce.com/2006/04/metadata\">\n",
        "    <fieldPermissions>\n",
        "        <editable>false</editable>\n",
        "        <field>Account.Industry</field>\n",
        "        <readable>true</readable>\n",
        "    </fieldPermissions>\n",
        "    <userLicense>Salesforce</userLicense>\n",
        "</Profile>\n",
    );

    #[test]
    fn parse_picks_up_structure() {
        let doc = Document::parse_str(SAMPLE).unwrap();
        assert_eq!(doc.root.name, "Profile");
        let fp = doc.root.child("fieldPermissions").unwrap();
        assert_eq!(fp.child_text("field"), Some("Account.Industry"));
        assert!(fp.bool_child("readable"));
        assert!(!fp.bool_child("editable"));
        assert_eq!(doc.root.child_text("userLicense"), Some("Salesforce"));
    }

    #[test]
    fn canonical_serialization_round_trips() {
        let doc = Document::parse_str(SAMPLE).unwrap();
        assert_eq!(doc.to_xml().unwrap(), SAMPLE);
    }

    #[test]
    fn text_is_escaped_on_write() {
        let mut doc = Document::new("Profile");
        doc.root.push_element(Element::with_text("description", "a < b & c"));
        let out = doc.to_xml().unwrap();
        assert!(out.contains("a &lt; b &amp; c"));
        let back = Document::parse_str(&out).unwrap();
        assert_eq!(back.root.child_text("description"), Some("a < b & c"));
    }

    #[test]
    fn insert_element_positions_by_element_index() {
        let mut root = Element::new("Profile");
        root.push_element(Element::with_text("a", "1"));
        root.push_element(Element::with_text("c", "3"));
        root.insert_element(1, Element::with_text("b", "2"));
        let names: Vec<_> = root.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(Document::parse_str("<Profile><open></Profile>").is_err());
        assert!(Document::parse_str("not xml at all").is_err());
    }
}
