//! Equation Pipeline - Single Entry Point
//!
//! workspace -> probe -> strategy -> typeset -> convert -> import -> cleanup.
//! The workspace is dropped on every exit path, so a failing stage never
//! leaves scratch files behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ToolchainConfig;
use crate::diagnostics::DiagnosticLog;
use crate::import::{import_fragment, ImportError, ImportedGroup};
use crate::process::{CommandOutput, CommandRunner, RunError, ShellCommand, ShellRunner};
use crate::source::{error_lines, tex_source, CompileRequest};
use crate::svg::SvgDocument;
use crate::toolchain::{select_strategy, Prober, Strategy, ToolAvailability};
use crate::workspace::Workspace;
use crate::ENGINE_VERSION;

static QUIET: DiagnosticLog = DiagnosticLog::disabled();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStage {
    DviToSvg,
    DviToPs,
    PsToSvg,
}

impl std::fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConversionStage::DviToSvg => "SVG file not generated with svg-converter",
            ConversionStage::DviToPs => "PS file not generated with ps-converter-a",
            ConversionStage::PsToSvg => "SVG file not generated with ps-converter-b",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Without formula, no equation will be generated")]
    EmptyFormula,

    #[error("Temporary directory cannot be created: {0}")]
    Workspace(#[source] io::Error),

    #[error("{tool} failed: {source}")]
    ProbeSpawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot write TeX source: {0}")]
    WriteSource(#[source] io::Error),

    #[error("Problem to generate DVI file (exit code {exit_code:?}){detail}")]
    Compilation {
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("No usable toolchain: need latex with dvisvgm, or latex with dvips and pstoedit")]
    NoUsableToolchain,

    #[error("{stage} (exit code {exit_code:?})")]
    Conversion {
        stage: ConversionStage,
        exit_code: Option<i32>,
    },

    #[error(transparent)]
    Command(#[from] RunError),

    #[error(transparent)]
    Import(#[from] ImportError),
}

/// What one successful run hands back to the host.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub group: ImportedGroup,
    pub strategy: Strategy,
    pub availability: ToolAvailability,
}

/// The equation pipeline - owns the toolchain configuration and the runner.
pub struct EquationPipeline<R: CommandRunner = ShellRunner> {
    config: ToolchainConfig,
    runner: R,
    log: DiagnosticLog,
}

impl EquationPipeline<ShellRunner> {
    pub fn new(config: ToolchainConfig, log: DiagnosticLog) -> Self {
        let runner = ShellRunner::new().with_timeout(config.timeout());
        Self::with_runner(config, runner, log)
    }
}

impl<R: CommandRunner> EquationPipeline<R> {
    pub fn with_runner(config: ToolchainConfig, runner: R, log: DiagnosticLog) -> Self {
        Self { config, runner, log }
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The trace only receives a run's details when the request asks for them.
    fn log_for(&self, request: &CompileRequest) -> &DiagnosticLog {
        if request.debug {
            &self.log
        } else {
            &QUIET
        }
    }

    /// Probe all four tools.
    pub fn probe(&self) -> Result<ToolAvailability, PipelineError> {
        self.probe_with(&self.log)
    }

    fn probe_with(&self, log: &DiagnosticLog) -> Result<ToolAvailability, PipelineError> {
        Prober::new(&self.runner, log).probe_all(&self.config)
    }

    fn run(&self, command: &ShellCommand, log: &DiagnosticLog) -> Result<CommandOutput, PipelineError> {
        Ok(self.runner.run(command, log)?)
    }

    /// Write the TeX source and typeset it into `<workspace>/<base>.dvi`.
    pub fn compile(
        &self,
        request: &CompileRequest,
        workspace: &Workspace,
        log: &DiagnosticLog,
    ) -> Result<PathBuf, PipelineError> {
        let tex = tex_source(request);
        log.record(format!("\n{}", tex));
        fs::write(workspace.tex_file(), &tex).map_err(PipelineError::WriteSource)?;
        log.record("TEX file generated");

        let line = format!(
            "{} -output-directory=\"{}\" -halt-on-error \"{}\"",
            self.config.typesetter.program,
            workspace.directory().display(),
            workspace.tex_file().display()
        );
        let command = ShellCommand::new(line).with_working_dir(workspace.directory());
        let output = self.run(&command, log)?;

        if !output.success() {
            log.record("DVI file not generated with typesetter");
            let errors = error_lines(&output.stdout);
            let detail = if errors.is_empty() {
                String::new()
            } else {
                format!(": {}", errors.join(" "))
            };
            return Err(PipelineError::Compilation {
                exit_code: output.exit_code,
                detail,
            });
        }
        log.record("DVI file generated with typesetter");
        Ok(workspace.dvi_file())
    }

    /// Drive the chosen converter chain; the fragment is its stdout.
    pub fn render_fragment(
        &self,
        strategy: Strategy,
        dvi: &Path,
        workspace: &Workspace,
        log: &DiagnosticLog,
    ) -> Result<String, PipelineError> {
        match strategy {
            Strategy::DirectSvg => {
                let line = format!(
                    "{} -v0 -a -n -s \"{}\"",
                    self.config.svg_converter.program,
                    dvi.display()
                );
                self.convert(&line, workspace, ConversionStage::DviToSvg, log)
            }
            Strategy::PostScript => {
                let ps = workspace.ps_file();
                let line = format!(
                    "{} -q -f -E -D {} -o \"{}\" \"{}\"",
                    self.config.ps_converter.program,
                    self.config.resolution,
                    ps.display(),
                    dvi.display()
                );
                self.convert(&line, workspace, ConversionStage::DviToPs, log)?;

                let line = format!(
                    "{} -f plot-svg -dt -ssp \"{}\"",
                    self.config.ps_vectorizer.program,
                    ps.display()
                );
                self.convert(&line, workspace, ConversionStage::PsToSvg, log)
            }
        }
    }

    fn convert(
        &self,
        line: &str,
        workspace: &Workspace,
        stage: ConversionStage,
        log: &DiagnosticLog,
    ) -> Result<String, PipelineError> {
        let command = ShellCommand::new(line).with_working_dir(workspace.directory());
        let output = self.run(&command, log)?;
        if !output.success() {
            log.record(stage.to_string());
            return Err(PipelineError::Conversion {
                stage,
                exit_code: output.exit_code,
            });
        }
        Ok(output.stdout)
    }

    /// Render `request` into a group named against `host`, without attaching it.
    pub fn generate(
        &self,
        request: &CompileRequest,
        host: &SvgDocument,
    ) -> Result<RenderOutcome, PipelineError> {
        if request.formula.trim().is_empty() {
            return Err(PipelineError::EmptyFormula);
        }
        let log = self.log_for(request);
        record_environment(log);
        log.record(&request.formula);

        let workspace = Workspace::create(
            &self.config.workspace_prefix,
            &self.config.base_name,
            log.clone(),
        )
        .map_err(PipelineError::Workspace)?;

        let availability = self.probe_with(log)?;
        let Some(strategy) = select_strategy(&availability) else {
            log.record("No process in use!");
            return Err(PipelineError::NoUsableToolchain);
        };
        log::info!("rendering with {}", strategy.describe());
        log.record(format!("{} process in use", strategy.describe()));

        let dvi = self.compile(request, &workspace, log)?;
        let fragment = self.render_fragment(strategy, &dvi, &workspace, log)?;
        log.record(format!("import_svg():\n{}\n", fragment));

        let group = import_fragment(
            &fragment,
            &host.ids(),
            host.page_size(),
            &request.formula,
            strategy,
        )?;
        log.record(format!("equation group {} built", group.name));

        workspace.close();

        Ok(RenderOutcome {
            group,
            strategy,
            availability,
        })
    }

    /// Generate and append the group to the host's current layer.
    pub fn insert(
        &self,
        request: &CompileRequest,
        host: &mut SvgDocument,
    ) -> Result<RenderOutcome, PipelineError> {
        let outcome = self.generate(request, host)?;
        let layer = host.append_to_current_layer(outcome.group.element.clone());
        self.log_for(request).record(format!(
            "Equation added to {}",
            layer.as_deref().unwrap_or("document root")
        ));
        Ok(outcome)
    }
}

fn record_environment(log: &DiagnosticLog) {
    if !log.is_enabled() {
        return;
    }
    log.record(format!("texsvg {}", ENGINE_VERSION));
    log.record(format!(
        "Platform: {} {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH,
        std::env::consts::FAMILY
    ));
    if let Ok(cwd) = std::env::current_dir() {
        log.record(format!("Current Working Directory: {}", cwd.display()));
    }
}

impl Default for EquationPipeline<ShellRunner> {
    fn default() -> Self {
        Self::new(ToolchainConfig::default(), DiagnosticLog::disabled())
    }
}
