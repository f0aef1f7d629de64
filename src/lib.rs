//! texsvg Core - LaTeX Equations as SVG Groups
//!
//! # Pipeline
//! 1. Scratch workspace
//! 2. Toolchain probe, strategy selection
//! 3. Typesetting to DVI
//! 4. Conversion to an SVG fragment (direct, or through PostScript)
//! 5. Import under a uniquely named group
//! 6. Cleanup, on every exit path

pub mod config;
pub mod diagnostics;
pub mod hashing;
pub mod import;
pub mod pipeline;
pub mod process;
pub mod source;
pub mod svg;
pub mod toolchain;
pub mod units;
pub mod workspace;

pub use config::{ConfigError, SuccessConvention, ToolSpec, ToolchainConfig};
pub use diagnostics::DiagnosticLog;
pub use hashing::{canonical_json, compute_job_hash};
pub use import::{import_fragment, ImportError, ImportedGroup};
pub use pipeline::{ConversionStage, EquationPipeline, PipelineError, RenderOutcome};
pub use process::{CommandOutput, CommandRunner, RunError, ShellCommand, ShellRunner};
pub use source::{tex_source, CompileRequest};
pub use svg::{DocumentError, PageSize, SvgDocument, SvgElement};
pub use toolchain::{select_strategy, Strategy, Tool, ToolAvailability, ToolStatus};
pub use workspace::Workspace;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
