//! Toolchain Probing and Strategy Selection
//!
//! Probes report which external tools are usable. The strategy is a pure
//! function of that report.

use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use crate::config::{ToolSpec, ToolchainConfig};
use crate::diagnostics::DiagnosticLog;
use crate::pipeline::PipelineError;
use crate::process::{CommandRunner, RunError, ShellCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tool {
    /// LaTeX engine producing DVI.
    #[serde(rename = "typesetter")]
    Typesetter,
    /// DVI to PostScript (`dvips`).
    #[serde(rename = "ps-converter-a")]
    PsConverter,
    /// PostScript to SVG through vector primitives (`pstoedit`).
    #[serde(rename = "ps-converter-b")]
    PsVectorizer,
    /// DVI straight to SVG (`dvisvgm`).
    #[serde(rename = "svg-converter")]
    SvgConverter,
}

impl Tool {
    /// Probe order.
    pub const ALL: [Tool; 4] = [
        Tool::Typesetter,
        Tool::PsConverter,
        Tool::PsVectorizer,
        Tool::SvgConverter,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Typesetter => "typesetter",
            Tool::PsConverter => "ps-converter-a",
            Tool::PsVectorizer => "ps-converter-b",
            Tool::SvgConverter => "svg-converter",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    pub available: bool,
    pub exit_code: Option<i32>,
    pub version: Option<Version>,
}

impl ToolStatus {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Usability of each tool for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAvailability {
    tools: BTreeMap<Tool, ToolStatus>,
}

impl ToolAvailability {
    /// Build a report without probing; missing tools count as unavailable.
    pub fn from_flags(flags: impl IntoIterator<Item = (Tool, bool)>) -> Self {
        let tools = flags
            .into_iter()
            .map(|(tool, available)| {
                (
                    tool,
                    ToolStatus {
                        available,
                        ..ToolStatus::default()
                    },
                )
            })
            .collect();
        Self { tools }
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.tools.get(&tool).is_some_and(|s| s.available)
    }

    pub fn status(&self, tool: Tool) -> Option<&ToolStatus> {
        self.tools.get(&tool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tool, &ToolStatus)> {
        self.tools.iter().map(|(tool, status)| (*tool, status))
    }
}

impl FromIterator<(Tool, ToolStatus)> for ToolAvailability {
    fn from_iter<I: IntoIterator<Item = (Tool, ToolStatus)>>(iter: I) -> Self {
        Self {
            tools: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// DVI to SVG in one step.
    #[serde(rename = "direct-svg")]
    DirectSvg,
    /// DVI to EPS, then EPS to SVG polygons.
    #[serde(rename = "postscript")]
    PostScript,
}

impl Strategy {
    pub fn describe(self) -> &'static str {
        match self {
            Strategy::DirectSvg => "typesetter and svg-converter",
            Strategy::PostScript => "typesetter, ps-converter-a and ps-converter-b",
        }
    }
}

/// Direct conversion wins whenever it is possible.
pub fn select_strategy(availability: &ToolAvailability) -> Option<Strategy> {
    let has = |tool| availability.is_available(tool);
    if has(Tool::Typesetter) && has(Tool::SvgConverter) {
        Some(Strategy::DirectSvg)
    } else if has(Tool::Typesetter) && has(Tool::PsConverter) && has(Tool::PsVectorizer) {
        Some(Strategy::PostScript)
    } else {
        None
    }
}

fn re_version() -> &'static Regex {
    static ONCE: OnceLock<Regex> = OnceLock::new();
    ONCE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").unwrap())
}

/// First `major.minor[.patch]` found in `text`.
pub fn parse_version(text: &str) -> Option<Version> {
    let caps = re_version().captures(text)?;
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    Some(Version::new(part(1), part(2), part(3)))
}

/// Runs the version queries and records the outcome of each.
pub struct Prober<'a, R: CommandRunner> {
    runner: &'a R,
    log: &'a DiagnosticLog,
}

impl<'a, R: CommandRunner> Prober<'a, R> {
    pub fn new(runner: &'a R, log: &'a DiagnosticLog) -> Self {
        Self { runner, log }
    }

    pub fn probe(&self, tool: Tool, spec: &ToolSpec) -> Result<ToolStatus, PipelineError> {
        let command = ShellCommand::new(spec.probe_command());
        let output = match self.runner.run(&command, self.log) {
            Ok(output) => output,
            Err(RunError::Spawn { source, .. }) => {
                self.log.record(format!("{} failed: {}", spec.program, source));
                return Err(PipelineError::ProbeSpawn {
                    tool: spec.program.clone(),
                    source,
                });
            }
            Err(e) => {
                log::warn!("{} probe gave no answer: {}", tool, e);
                self.log.record(format!("{} not OK", spec.program));
                return Ok(ToolStatus::unavailable());
            }
        };

        let available = spec.success.is_success(output.exit_code);
        let version = if available {
            parse_version(&output.stdout).or_else(|| parse_version(&output.stderr))
        } else {
            None
        };

        if available {
            self.log.record(format!("{} OK", spec.program));
        } else {
            self.log.record(format!("{} not OK", spec.program));
        }

        if let (Some(req), Some(found)) = (&spec.min_version, &version) {
            if !req.matches(found) {
                log::warn!("{} {} does not satisfy {}", spec.program, found, req);
                self.log.record(format!(
                    "{} version {} is older than required {}",
                    spec.program, found, req
                ));
            }
        }

        Ok(ToolStatus {
            available,
            exit_code: output.exit_code,
            version,
        })
    }

    /// Probe every tool, in order, without stopping at the first answer.
    pub fn probe_all(&self, config: &ToolchainConfig) -> Result<ToolAvailability, PipelineError> {
        Tool::ALL
            .iter()
            .map(|&tool| Ok((tool, self.probe(tool, config.spec(tool))?)))
            .collect()
    }
}
