//! Owned SVG Tree - Parse, Query, Mutate, Serialise
//!
//! `roxmltree` is read-only, so documents are lifted into an owned,
//! namespace-aware tree that can be edited and written back out.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::units::to_user_units;

pub const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
pub const INKSCAPE_NS: &str = "http://www.inkscape.org/namespaces/inkscape";
pub const SODIPODI_NS: &str = "http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd";

/// Prefixes used when a namespace has to be declared on output.
const PREFERRED_PREFIXES: [(&str, &str); 3] = [
    (XLINK_NS, "xlink"),
    (INKSCAPE_NS, "inkscape"),
    (SODIPODI_NS, "sodipodi"),
];

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Cannot read document: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed document: {0}")]
    Parse(#[from] roxmltree::Error),
}

/// Expanded name: namespace URI plus local part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XName {
    pub namespace: Option<String>,
    pub local: String,
}

impl XName {
    pub fn new(namespace: Option<&str>, local: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            local: local.to_string(),
        }
    }

    /// A name outside any namespace, as plain SVG attributes are.
    pub fn local(local: &str) -> Self {
        Self::new(None, local)
    }

    pub fn svg(local: &str) -> Self {
        Self::new(Some(SVG_NS), local)
    }

    pub fn xlink(local: &str) -> Self {
        Self::new(Some(XLINK_NS), local)
    }

    pub fn is(&self, namespace: Option<&str>, local: &str) -> bool {
        self.namespace.as_deref() == namespace && self.local == local
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SvgNode {
    Element(SvgElement),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvgElement {
    pub name: XName,
    pub attributes: Vec<(XName, String)>,
    /// Declarations made on this element (not inherited ones).
    pub namespaces: Vec<NamespaceDecl>,
    pub children: Vec<SvgNode>,
}

impl SvgElement {
    pub fn new(name: XName) -> Self {
        Self {
            name,
            attributes: vec![],
            namespaces: vec![],
            children: vec![],
        }
    }

    pub fn attribute(&self, name: &XName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute(&XName::local("id"))
    }

    /// Replace the value in place, or append the attribute.
    pub fn set_attribute(&mut self, name: XName, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn push_element(&mut self, element: SvgElement) {
        self.children.push(SvgNode::Element(element));
    }

    /// Element children, in document order.
    pub fn elements(&self) -> impl Iterator<Item = &SvgElement> {
        self.children.iter().filter_map(|c| match c {
            SvgNode::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn collect_ids(&self, ids: &mut HashSet<String>) {
        if let Some(id) = self.id() {
            ids.insert(id.to_string());
        }
        for child in self.elements() {
            child.collect_ids(ids);
        }
    }

    pub fn find(&self, pred: &dyn Fn(&SvgElement) -> bool) -> Option<&SvgElement> {
        if pred(self) {
            return Some(self);
        }
        self.elements().find_map(|child| child.find(pred))
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut SvgElement> {
        if self.id() == Some(id) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| match child {
            SvgNode::Element(e) => e.find_by_id_mut(id),
            _ => None,
        })
    }

    /// Levels of elements below and including this one.
    pub fn depth(&self) -> usize {
        1 + self.elements().map(SvgElement::depth).max().unwrap_or(0)
    }

    pub fn to_xml_string(&self) -> String {
        let mut writer = XmlWriter::default();
        writer.element(self);
        writer.out
    }

    fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
        let inherited: Vec<(Option<&str>, &str)> = node
            .parent_element()
            .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
            .unwrap_or_default();

        let namespaces = node
            .namespaces()
            .filter(|ns| ns.name() != Some("xml"))
            .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
            .map(|ns| NamespaceDecl {
                prefix: ns.name().map(str::to_string),
                uri: ns.uri().to_string(),
            })
            .collect();

        let attributes = node
            .attributes()
            .map(|a| (XName::new(a.namespace(), a.name()), a.value().to_string()))
            .collect();

        let mut children = Vec::new();
        for child in node.children() {
            if child.is_element() {
                children.push(SvgNode::Element(Self::from_node(child)));
            } else if child.is_text() {
                children.push(SvgNode::Text(child.text().unwrap_or_default().to_string()));
            } else if child.is_comment() {
                children.push(SvgNode::Comment(child.text().unwrap_or_default().to_string()));
            }
        }

        Self {
            name: XName::new(node.tag_name().namespace(), node.tag_name().name()),
            attributes,
            namespaces,
            children,
        }
    }
}

/// Parse markup into an owned tree rooted at its document element.
///
/// Renderers commonly emit a DOCTYPE, so DTDs are accepted.
pub fn parse_element(text: &str) -> Result<SvgElement, roxmltree::Error> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, options)?;
    Ok(SvgElement::from_node(doc.root_element()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn shorter(&self) -> f64 {
        self.width.min(self.height)
    }

    pub fn longer(&self) -> f64 {
        self.width.max(self.height)
    }
}

/// The host drawing: a whole SVG document that receives imported groups.
#[derive(Debug, Clone, PartialEq)]
pub struct SvgDocument {
    root: SvgElement,
}

impl SvgDocument {
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        Ok(Self {
            root: parse_element(text)?,
        })
    }

    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// An empty `<svg>` with no page size.
    pub fn blank() -> Self {
        let mut root = SvgElement::new(XName::svg("svg"));
        root.namespaces = vec![
            NamespaceDecl {
                prefix: None,
                uri: SVG_NS.to_string(),
            },
            NamespaceDecl {
                prefix: Some("xlink".to_string()),
                uri: XLINK_NS.to_string(),
            },
        ];
        Self { root }
    }

    pub fn root(&self) -> &SvgElement {
        &self.root
    }

    pub fn ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        self.root.collect_ids(&mut ids);
        ids
    }

    /// Root `width`/`height` in user units, falling back to the viewBox extent.
    pub fn page_size(&self) -> PageSize {
        let view_box: Vec<f64> = self
            .root
            .attribute(&XName::local("viewBox"))
            .map(|vb| {
                vb.split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|s| !s.is_empty())
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        let extent = |attr: &str, index: usize| match self.root.attribute(&XName::local(attr)) {
            Some(value) => to_user_units(value),
            None if view_box.len() == 4 => view_box[index],
            None => 0.0,
        };
        PageSize {
            width: extent("width", 2),
            height: extent("height", 3),
        }
    }

    /// Layer named by `sodipodi:namedview/@inkscape:current-layer`, if it exists.
    pub fn current_layer_id(&self) -> Option<&str> {
        let namedview = self
            .root
            .find(&|e: &SvgElement| e.name.is(Some(SODIPODI_NS), "namedview"))?;
        let layer = namedview.attribute(&XName::new(Some(INKSCAPE_NS), "current-layer"))?;
        self.root
            .find(&|e: &SvgElement| e.id() == Some(layer))
            .and_then(|e| e.id())
    }

    /// Append to the current layer (or the root). Returns the layer id used.
    pub fn append_to_current_layer(&mut self, element: SvgElement) -> Option<String> {
        let layer = self.current_layer_id().map(str::to_string);
        let target = match &layer {
            Some(id) => self.root.find_by_id_mut(id),
            None => None,
        };
        match target {
            Some(parent) => parent.push_element(element),
            None => self.root.push_element(element),
        }
        layer
    }

    pub fn to_xml_string(&self) -> String {
        let mut writer = XmlWriter::default();
        writer.out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n");
        writer.element(&self.root);
        writer.out.push('\n');
        writer.out
    }
}

/// Serialiser that tracks in-scope prefixes and declares missing ones.
#[derive(Default)]
struct XmlWriter {
    out: String,
    scopes: Vec<(Option<String>, String)>,
    generated: usize,
}

impl XmlWriter {
    fn element(&mut self, e: &SvgElement) {
        let mark = self.scopes.len();
        let mut decls: Vec<NamespaceDecl> = Vec::new();
        for ns in &e.namespaces {
            self.bind(ns.prefix.clone(), &ns.uri, &mut decls);
        }

        let tag = self.element_name(&e.name, &mut decls);
        let attrs: Vec<(String, &str)> = e
            .attributes
            .iter()
            .map(|(name, value)| (self.attribute_name(name, &mut decls), value.as_str()))
            .collect();

        let _ = write!(self.out, "<{}", tag);
        for decl in &decls {
            match &decl.prefix {
                Some(p) => {
                    let _ = write!(self.out, " xmlns:{}=\"{}\"", p, escape_xml(&decl.uri));
                }
                None => {
                    let _ = write!(self.out, " xmlns=\"{}\"", escape_xml(&decl.uri));
                }
            }
        }
        for (name, value) in attrs {
            let _ = write!(self.out, " {}=\"{}\"", name, escape_xml(value));
        }

        if e.children.is_empty() {
            self.out.push_str("/>");
        } else {
            self.out.push('>');
            for child in &e.children {
                match child {
                    SvgNode::Element(c) => self.element(c),
                    SvgNode::Text(t) => self.out.push_str(&escape_text(t)),
                    SvgNode::Comment(c) => {
                        let _ = write!(self.out, "<!--{}-->", c);
                    }
                }
            }
            let _ = write!(self.out, "</{}>", tag);
        }

        self.scopes.truncate(mark);
    }

    fn bind(&mut self, prefix: Option<String>, uri: &str, decls: &mut Vec<NamespaceDecl>) {
        self.scopes.push((prefix.clone(), uri.to_string()));
        decls.retain(|d| d.prefix != prefix);
        decls.push(NamespaceDecl {
            prefix,
            uri: uri.to_string(),
        });
    }

    fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// A prefix currently bound to `uri` and not shadowed.
    fn prefix_for(&self, uri: &str) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .filter_map(|(p, u)| p.as_deref().filter(|_| u == uri))
            .find(|p| self.resolve(Some(*p)) == Some(uri))
            .map(str::to_string)
    }

    fn fresh_prefix(&mut self, uri: &str) -> String {
        if let Some((_, preferred)) = PREFERRED_PREFIXES.iter().find(|(u, _)| *u == uri) {
            if self.resolve(Some(*preferred)).is_none() {
                return preferred.to_string();
            }
        }
        loop {
            let candidate = format!("ns{}", self.generated);
            self.generated += 1;
            if self.resolve(Some(&candidate)).is_none() {
                return candidate;
            }
        }
    }

    fn element_name(&mut self, name: &XName, decls: &mut Vec<NamespaceDecl>) -> String {
        let Some(uri) = name.namespace.as_deref() else {
            if self.resolve(None).is_some_and(|u| !u.is_empty()) {
                self.bind(None, "", decls);
            }
            return name.local.clone();
        };
        if uri == XML_NS {
            return format!("xml:{}", name.local);
        }
        if self.resolve(None) == Some(uri) {
            return name.local.clone();
        }
        if let Some(prefix) = self.prefix_for(uri) {
            return format!("{}:{}", prefix, name.local);
        }
        if uri == SVG_NS {
            self.bind(None, uri, decls);
            return name.local.clone();
        }
        let prefix = self.fresh_prefix(uri);
        self.bind(Some(prefix.clone()), uri, decls);
        format!("{}:{}", prefix, name.local)
    }

    fn attribute_name(&mut self, name: &XName, decls: &mut Vec<NamespaceDecl>) -> String {
        let Some(uri) = name.namespace.as_deref() else {
            return name.local.clone();
        };
        if uri == XML_NS {
            return format!("xml:{}", name.local);
        }
        let prefix = match self.prefix_for(uri) {
            Some(prefix) => prefix,
            None => {
                let prefix = self.fresh_prefix(uri);
                self.bind(Some(prefix.clone()), uri, decls);
                prefix
            }
        };
        format!("{}:{}", prefix, name.local)
    }
}

/// Escape special XML characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
