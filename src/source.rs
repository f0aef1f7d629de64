//! TeX Source Assembly
//!
//! The formula is pasted verbatim into a fixed article preamble. No math
//! delimiters are inferred; the caller supplies `\(...\)`, `$$...$$` or
//! an environment as needed.

use serde::{Deserialize, Serialize};

/// Always loaded, never repeated by user packages.
pub const BASE_PACKAGES: [&str; 3] = ["amsmath", "amssymb", "amsfonts"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub formula: String,
    #[serde(default)]
    pub extra_packages: Vec<String>,
    #[serde(default)]
    pub debug: bool,
}

impl CompileRequest {
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            extra_packages: vec![],
            debug: false,
        }
    }

    /// Packages in their comma-separated surface form, e.g. `"amsfonts, mathrsfs"`.
    pub fn with_packages(mut self, list: &str) -> Self {
        self.extra_packages = parse_package_list(list);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Split a comma-separated list, removing whitespace inside each name.
pub fn parse_package_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|pkg| pkg.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|pkg| !pkg.is_empty())
        .collect()
}

/// `\usepackage` lines for the extra packages, base packages and repeats skipped.
pub fn package_lines(packages: &[String]) -> String {
    let mut seen: Vec<String> = BASE_PACKAGES.iter().map(|p| p.to_string()).collect();
    let mut lines = String::new();
    for pkg in packages {
        let name: String = pkg.chars().filter(|c| !c.is_whitespace()).collect();
        if name.is_empty() || seen.contains(&name) {
            continue;
        }
        lines.push_str(&format!("\\usepackage{{{}}}\n", name));
        seen.push(name);
    }
    lines
}

pub fn tex_source(request: &CompileRequest) -> String {
    let mut tex = String::from("%% generated by texsvg\n");
    tex.push_str("\\documentclass{article}\n");
    for pkg in BASE_PACKAGES {
        tex.push_str(&format!("\\usepackage{{{}}}\n", pkg));
    }
    tex.push_str(&package_lines(&request.extra_packages));
    tex.push_str("\\thispagestyle{empty}\n");
    tex.push_str("\\begin{document}\n");
    tex.push_str(&request.formula);
    tex.push_str("\n\\end{document}\n");
    tex
}

/// Lines of typesetter output that report an error (`! Undefined control sequence.`).
pub fn error_lines(output: &str) -> Vec<&str> {
    output.lines().filter(|line| line.starts_with('!')).collect()
}
