//! Toolchain Configuration - Programs, Probes, Policies

use semver::VersionReq;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::toolchain::Tool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How a probe's exit code maps to "the tool is usable".
///
/// The supported tools disagree: most exit 0 on a version query, but
/// `pstoedit -v` exits nonzero when it works.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuccessConvention {
    #[default]
    ZeroMeansOk,
    NonzeroMeansOk,
}

impl SuccessConvention {
    /// `None` means the child was terminated by a signal, which counts as nonzero.
    pub fn is_success(self, exit_code: Option<i32>) -> bool {
        match self {
            SuccessConvention::ZeroMeansOk => exit_code == Some(0),
            SuccessConvention::NonzeroMeansOk => exit_code != Some(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub program: String,
    #[serde(default = "default_probe_args")]
    pub probe_args: Vec<String>,
    #[serde(default)]
    pub success: SuccessConvention,
    #[serde(default)]
    pub min_version: Option<VersionReq>,
}

fn default_probe_args() -> Vec<String> {
    vec!["--version".to_string()]
}

impl ToolSpec {
    pub fn new(program: &str, probe_args: &[&str], success: SuccessConvention) -> Self {
        Self {
            program: program.to_string(),
            probe_args: probe_args.iter().map(|a| a.to_string()).collect(),
            success,
            min_version: None,
        }
    }

    pub fn with_min_version(mut self, req: VersionReq) -> Self {
        self.min_version = Some(req);
        self
    }

    /// The version query as a single shell line, e.g. `dvisvgm -V`.
    pub fn probe_command(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.probe_args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolchainConfig {
    #[serde(default = "default_typesetter", deserialize_with = "typesetter_override")]
    pub typesetter: ToolSpec,
    #[serde(default = "default_ps_converter", deserialize_with = "ps_converter_override")]
    pub ps_converter: ToolSpec,
    #[serde(default = "default_ps_vectorizer", deserialize_with = "ps_vectorizer_override")]
    pub ps_vectorizer: ToolSpec,
    #[serde(default = "default_svg_converter", deserialize_with = "svg_converter_override")]
    pub svg_converter: ToolSpec,
    /// Upper bound for any single external invocation. `None` waits forever.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// DPI handed to the PostScript converter.
    #[serde(default = "default_resolution")]
    pub resolution: u32,
    #[serde(default = "default_base_name")]
    pub base_name: String,
    #[serde(default = "default_workspace_prefix")]
    pub workspace_prefix: String,
}

fn default_typesetter() -> ToolSpec {
    ToolSpec::new("latex", &["--version"], SuccessConvention::ZeroMeansOk)
}

fn default_ps_converter() -> ToolSpec {
    ToolSpec::new("dvips", &["-v"], SuccessConvention::ZeroMeansOk)
}

fn default_ps_vectorizer() -> ToolSpec {
    ToolSpec::new("pstoedit", &["-v"], SuccessConvention::NonzeroMeansOk)
}

fn default_svg_converter() -> ToolSpec {
    let spec = ToolSpec::new("dvisvgm", &["-V"], SuccessConvention::ZeroMeansOk);
    match VersionReq::parse(">=0.8.3") {
        Ok(req) => spec.with_min_version(req),
        Err(_) => spec,
    }
}

/// A tool entry in a config file. Absent fields keep that tool's own default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolOverride {
    program: Option<String>,
    probe_args: Option<Vec<String>>,
    success: Option<SuccessConvention>,
    min_version: Option<VersionReq>,
}

impl ToolOverride {
    fn apply(self, mut spec: ToolSpec) -> ToolSpec {
        if let Some(program) = self.program {
            spec.program = program;
        }
        if let Some(args) = self.probe_args {
            spec.probe_args = args;
        }
        if let Some(success) = self.success {
            spec.success = success;
        }
        if let Some(req) = self.min_version {
            spec.min_version = Some(req);
        }
        spec
    }
}

fn typesetter_override<'de, D: Deserializer<'de>>(d: D) -> Result<ToolSpec, D::Error> {
    Ok(ToolOverride::deserialize(d)?.apply(default_typesetter()))
}

fn ps_converter_override<'de, D: Deserializer<'de>>(d: D) -> Result<ToolSpec, D::Error> {
    Ok(ToolOverride::deserialize(d)?.apply(default_ps_converter()))
}

fn ps_vectorizer_override<'de, D: Deserializer<'de>>(d: D) -> Result<ToolSpec, D::Error> {
    Ok(ToolOverride::deserialize(d)?.apply(default_ps_vectorizer()))
}

fn svg_converter_override<'de, D: Deserializer<'de>>(d: D) -> Result<ToolSpec, D::Error> {
    Ok(ToolOverride::deserialize(d)?.apply(default_svg_converter()))
}

fn default_resolution() -> u32 { 600 }
fn default_base_name() -> String { "eq".to_string() }
fn default_workspace_prefix() -> String { "texsvg-".to_string() }

impl ToolchainConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn spec(&self, tool: Tool) -> &ToolSpec {
        match tool {
            Tool::Typesetter => &self.typesetter,
            Tool::PsConverter => &self.ps_converter,
            Tool::PsVectorizer => &self.ps_vectorizer,
            Tool::SvgConverter => &self.svg_converter,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            typesetter: default_typesetter(),
            ps_converter: default_ps_converter(),
            ps_vectorizer: default_ps_vectorizer(),
            svg_converter: default_svg_converter(),
            timeout_secs: None,
            resolution: default_resolution(),
            base_name: default_base_name(),
            workspace_prefix: default_workspace_prefix(),
        }
    }
}
