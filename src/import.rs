//! Fragment Import - Namespacing Renderer Output into the Host Document
//!
//! Renderer output is copied two levels deep under a fresh group. Every id
//! the copy carries is derived from the group's name, which is unique in
//! the host document, and every `href` is rewritten to match.
//!
//! Deeper nesting is not reproduced. Both supported renderers emit flat
//! `defs` + `g` fragments.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::svg::{parse_element, PageSize, SvgElement, XName, SVG_NS, XLINK_NS};
use crate::toolchain::Strategy;

pub const GROUP_BASE_NAME: &str = "equation";
pub const GROUP_STYLE: &str = "fill: black;";

/// Empirical offsets for the PostScript route, as fractions of the page's
/// shorter and longer sides.
const FLIP_OFFSET_SHORT: f64 = 0.2;
const FLIP_OFFSET_LONG: f64 = 0.65;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Problem to import the rendered SVG: {0}")]
    Parse(#[from] roxmltree::Error),

    /// The renderer produced an id or reference outside its `defs`.
    #[error("Rendered SVG refers to `{0}`, which none of its definitions declare")]
    UnmappedIdentifier(String),
}

/// Renderer output grafted into a new, not yet attached, group.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedGroup {
    pub name: String,
    pub element: SvgElement,
}

/// `equation_00`, unless taken; then `equation_00`, `equation_01`, ...
///
/// The base candidate is retried once as the first counted candidate. A
/// candidate is taken when it, or any id derived from it (`<name>_...`),
/// is already in the host.
pub fn unique_group_name(existing: &HashSet<String>) -> String {
    let taken = |name: &str| {
        let derived = format!("{}_", name);
        existing.contains(name) || existing.iter().any(|id| id.starts_with(&derived))
    };
    let mut name = format!("{}_00", GROUP_BASE_NAME);
    let mut index = 0;
    while taken(&name) {
        name = format!("{}_{:02}", GROUP_BASE_NAME, index);
        index += 1;
    }
    name
}

/// Flip vertically and move onto the page; `pstoedit` output is y-up.
pub fn compensating_transform(page: PageSize) -> String {
    format!(
        "matrix(1,0,0,-1,{:.6},{:.6})",
        -page.shorter() * FLIP_OFFSET_SHORT,
        page.longer() * FLIP_OFFSET_LONG
    )
}

/// Old fragment id -> `<group>_<NN>`, numbered across every `defs` child.
#[derive(Debug, Clone, Default)]
pub struct IdRenameTable {
    renamed: HashMap<String, String>,
}

impl IdRenameTable {
    pub fn build(group: &str, fragment: &SvgElement) -> Self {
        let mut renamed = HashMap::new();
        let mut counter = 0;
        for defs in fragment.elements().filter(|e| is_defs(e)) {
            for definition in defs.elements() {
                if let Some(id) = definition.id() {
                    renamed.insert(id.to_string(), format!("{}_{:02}", group, counter));
                }
                counter += 1;
            }
        }
        Self { renamed }
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.renamed.get(old).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.renamed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renamed.is_empty()
    }

    fn require(&self, old: &str) -> Result<&str, ImportError> {
        self.get(old)
            .ok_or_else(|| ImportError::UnmappedIdentifier(old.to_string()))
    }
}

fn is_defs(element: &SvgElement) -> bool {
    element.name.is(Some(SVG_NS), "defs")
}

fn is_reference(name: &XName) -> bool {
    name.is(Some(XLINK_NS), "href") || name.is(None, "href")
}

/// Copy one grandchild: every attribute, with id and references remapped.
fn copy_leaf(source: &SvgElement, table: &IdRenameTable) -> Result<SvgElement, ImportError> {
    let mut copy = SvgElement::new(source.name.clone());
    for (name, value) in &source.attributes {
        let value = if name.is(None, "id") {
            table.require(value)?.to_string()
        } else if is_reference(name) {
            let target = value.rsplit('#').next().unwrap_or_default();
            format!("#{}", table.require(target)?)
        } else {
            value.clone()
        };
        copy.attributes.push((name.clone(), value));
    }
    Ok(copy)
}

/// Parse `fragment` and rebuild it under a group named against `host_ids`.
pub fn import_fragment(
    fragment: &str,
    host_ids: &HashSet<String>,
    page: PageSize,
    formula: &str,
    strategy: Strategy,
) -> Result<ImportedGroup, ImportError> {
    let source = parse_element(fragment)?;
    let name = unique_group_name(host_ids);

    let mut group = SvgElement::new(XName::svg("g"));
    group.set_attribute(XName::local("id"), name.as_str());
    group.set_attribute(XName::local("style"), GROUP_STYLE);
    group.set_attribute(XName::local("title"), formula);
    if strategy == Strategy::PostScript {
        let transform = compensating_transform(page);
        log::debug!(
            "page {}x{} (short {}, long {}), applying {}",
            page.width,
            page.height,
            page.shorter(),
            page.longer(),
            transform
        );
        group.set_attribute(XName::local("transform"), transform);
    }

    let table = IdRenameTable::build(&name, &source);

    for child in source.elements() {
        let mut copy = SvgElement::new(child.name.clone());
        if child.id().is_some() {
            copy.set_attribute(XName::local("id"), format!("{}_{}", name, child.name.local));
        }
        for grandchild in child.elements() {
            copy.push_element(copy_leaf(grandchild, &table)?);
        }
        group.push_element(copy);
    }

    Ok(ImportedGroup {
        name,
        element: group,
    })
}
