//! Contract Invariant Tests
//!
//! End-to-end runs against a scripted toolchain. Nothing here needs a TeX
//! installation.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use texsvg_core::{
    svg::XName, tex_source, CommandOutput, CommandRunner, CompileRequest, ConversionStage,
    DiagnosticLog, EquationPipeline, PipelineError, RunError, ShellCommand, Strategy, SvgDocument,
    SvgElement, ToolchainConfig,
};

const DIRECT_FRAGMENT: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<svg version='1.1' xmlns='http://www.w3.org/2000/svg' xmlns:xlink='http://www.w3.org/1999/xlink' width='20pt' height='9pt' viewBox='0 0 20 9'>
<defs>
<path id='g0-120' d='M3.3 -3.2C3.4 -3.5 3.6 -4.4 4.3 -4.4Z'/>
<path id='g1-50' d='M3.5 -1.3H3.2C3.2 -1.1 3.1 -0.5 2.9 -0.4Z'/>
</defs>
<g id='page1'>
<use x='0' y='8' xlink:href='#g0-120'/>
<use x='5.7' y='4.4' xlink:href='#g1-50'/>
</g>
</svg>"#;

const POLYGON_FRAGMENT: &str = r#"<?xml version="1.0" standalone="yes"?>
<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100">
<g style="stroke:none">
<polygon points="10,10 20,20 30,10" style="fill:#000000"/>
<polygon points="40,10 50,20 60,10" style="fill:#000000"/>
</g>
</svg>"#;

const HOST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<svg xmlns="http://www.w3.org/2000/svg"
     xmlns:xlink="http://www.w3.org/1999/xlink"
     xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape"
     xmlns:sodipodi="http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd"
     width="210mm" height="297mm" viewBox="0 0 744.09 1052.36" id="svg2">
  <sodipodi:namedview id="base" inkscape:current-layer="layer2"/>
  <g inkscape:label="Layer 1" inkscape:groupmode="layer" id="layer1">
    <rect id="rect10" x="0" y="0" width="10" height="10"/>
  </g>
  <g inkscape:label="Layer 2" inkscape:groupmode="layer" id="layer2"/>
</svg>"#;

/// Answers probes from a table and plays the typesetter and converters.
struct FakeToolchain {
    probe_codes: HashMap<&'static str, i32>,
    failing: Option<&'static str>,
    unlaunchable: Option<&'static str>,
    fragment: String,
    lines: RefCell<Vec<String>>,
}

impl FakeToolchain {
    fn new(probe_codes: &[(&'static str, i32)]) -> Self {
        Self {
            probe_codes: probe_codes.iter().copied().collect(),
            failing: None,
            unlaunchable: None,
            fragment: DIRECT_FRAGMENT.to_string(),
            lines: RefCell::new(vec![]),
        }
    }

    /// latex + dvisvgm usable.
    fn direct() -> Self {
        Self::new(&[("latex", 0), ("dvips", 0), ("pstoedit", 0), ("dvisvgm", 0)])
    }

    /// latex + dvips + pstoedit usable, no dvisvgm.
    fn postscript() -> Self {
        let mut fake = Self::new(&[("latex", 0), ("dvips", 0), ("pstoedit", 1), ("dvisvgm", 127)]);
        fake.fragment = POLYGON_FRAGMENT.to_string();
        fake
    }

    fn failing_at(mut self, program: &'static str) -> Self {
        self.failing = Some(program);
        self
    }

    fn emitting(mut self, fragment: &str) -> Self {
        self.fragment = fragment.to_string();
        self
    }

    fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

fn answer(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(exit_code),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

impl CommandRunner for FakeToolchain {
    fn run(&self, command: &ShellCommand, _log: &DiagnosticLog) -> Result<CommandOutput, RunError> {
        self.lines.borrow_mut().push(command.line.clone());
        let program = command.program();

        if self.unlaunchable == Some(program) {
            return Err(RunError::Spawn {
                command: command.line.clone(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "not executable"),
            });
        }

        let Some(dir) = &command.working_dir else {
            let code = self.probe_codes.get(program).copied().unwrap_or(127);
            return Ok(answer(code, &format!("{} (TeX Live 2023) 3.141592653", program)));
        };

        if self.failing == Some(program) {
            return Ok(answer(1, "This is pdfTeX\n! Undefined control sequence.\nl.7 \\foo"));
        }
        match program {
            "latex" => {
                assert!(dir.join("eq.tex").exists(), "source written before typesetting");
                fs::write(dir.join("eq.dvi"), "dvi").unwrap();
                fs::write(dir.join("eq.aux"), "aux").unwrap();
                fs::write(dir.join("eq.log"), "log").unwrap();
                Ok(answer(0, "Output written on eq.dvi (1 page, 312 bytes)."))
            }
            "dvips" => {
                fs::write(dir.join("eq.ps"), "%!PS-Adobe-3.0 EPSF-3.0").unwrap();
                Ok(answer(0, ""))
            }
            _ => Ok(answer(0, &self.fragment)),
        }
    }
}

/// Each test gets its own workspace prefix so leftovers can be found.
fn pipeline(fake: FakeToolchain, prefix: &str) -> EquationPipeline<FakeToolchain> {
    let config = ToolchainConfig {
        workspace_prefix: prefix.to_string(),
        ..ToolchainConfig::default()
    };
    EquationPipeline::with_runner(config, fake, DiagnosticLog::disabled())
}

fn leftovers(prefix: &str) -> Vec<PathBuf> {
    fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .map(|e| e.path())
        .collect()
}

fn all_ids(element: &SvgElement, out: &mut Vec<String>) {
    if let Some(id) = element.id() {
        out.push(id.to_string());
    }
    for child in element.elements() {
        all_ids(child, out);
    }
}

fn hrefs(element: &SvgElement, out: &mut Vec<String>) {
    for (name, value) in &element.attributes {
        if name.local == "href" {
            out.push(value.clone());
        }
    }
    for child in element.elements() {
        hrefs(child, out);
    }
}

#[derive(Clone, Default)]
struct Trace(Arc<Mutex<Vec<u8>>>);

impl Write for Trace {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Trace {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

#[test]
fn invariant_direct_conversion_preferred() {
    let p = pipeline(FakeToolchain::direct(), "texsvg-inv-direct-");
    let outcome = p
        .generate(&CompileRequest::new(r"\(x^2\)"), &SvgDocument::blank())
        .unwrap();

    assert_eq!(outcome.strategy, Strategy::DirectSvg);
    assert_eq!(outcome.group.element.attribute(&XName::local("transform")), None);

    let lines = p.runner().lines();
    assert!(lines.iter().any(|l| l.starts_with("dvisvgm -v0 -a -n -s \"")));
    assert!(!lines.iter().any(|l| l.starts_with("dvips -q")));
    assert!(!lines.iter().any(|l| l.starts_with("pstoedit -f")));
}

#[test]
fn invariant_postscript_route_flips_group() {
    let p = pipeline(FakeToolchain::postscript(), "texsvg-inv-ps-");
    let host = SvgDocument::parse(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="1000" height="500"/>"#,
    )
    .unwrap();
    let outcome = p.generate(&CompileRequest::new(r"\(x^2\)"), &host).unwrap();

    assert_eq!(outcome.strategy, Strategy::PostScript);
    assert_eq!(
        outcome.group.element.attribute(&XName::local("transform")),
        Some("matrix(1,0,0,-1,-100.000000,650.000000)")
    );

    let lines = p.runner().lines();
    let dvips = lines.iter().find(|l| l.starts_with("dvips -q")).unwrap();
    assert!(dvips.contains("-f -E -D 600 -o \""));
    assert!(dvips.ends_with("eq.dvi\""));
    let pstoedit = lines.iter().find(|l| l.starts_with("pstoedit -f")).unwrap();
    assert!(pstoedit.starts_with("pstoedit -f plot-svg -dt -ssp \""));
    assert!(pstoedit.ends_with("eq.ps\""));
}

#[test]
fn invariant_no_usable_toolchain_yields_no_group() {
    let prefix = "texsvg-inv-none-";
    let fake = FakeToolchain::new(&[("latex", 0), ("dvips", 1), ("pstoedit", 0), ("dvisvgm", 2)]);
    let p = pipeline(fake, prefix);

    let mut host = SvgDocument::parse(HOST).unwrap();
    let before = host.clone();
    let result = p.insert(&CompileRequest::new(r"\(x\)"), &mut host);

    assert!(matches!(result, Err(PipelineError::NoUsableToolchain)));
    assert_eq!(host, before);
    // Only the four probes ran; nothing was typeset.
    assert_eq!(p.runner().lines().len(), 4);
    assert!(leftovers(prefix).is_empty());
}

#[test]
fn invariant_missing_typesetter_is_reported_as_no_toolchain() {
    let fake = FakeToolchain::new(&[("latex", 127), ("dvips", 0), ("pstoedit", 1), ("dvisvgm", 0)]);
    let p = pipeline(fake, "texsvg-inv-nolatex-");
    let result = p.generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank());
    assert!(matches!(result, Err(PipelineError::NoUsableToolchain)));
}

#[test]
fn invariant_cleanup_on_every_exit_path() {
    let cases: Vec<(&str, FakeToolchain)> = vec![
        ("texsvg-inv-clean-ok-", FakeToolchain::direct()),
        ("texsvg-inv-clean-ps-ok-", FakeToolchain::postscript()),
        ("texsvg-inv-clean-latex-", FakeToolchain::direct().failing_at("latex")),
        ("texsvg-inv-clean-dvisvgm-", FakeToolchain::direct().failing_at("dvisvgm")),
        ("texsvg-inv-clean-dvips-", FakeToolchain::postscript().failing_at("dvips")),
        ("texsvg-inv-clean-pstoedit-", FakeToolchain::postscript().failing_at("pstoedit")),
        ("texsvg-inv-clean-import-", FakeToolchain::direct().emitting("this is not svg")),
    ];

    for (prefix, fake) in cases {
        let p = pipeline(fake, prefix);
        let _ = p.generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank());
        assert!(leftovers(prefix).is_empty(), "{} left files behind", prefix);
    }
}

#[test]
fn invariant_stage_failures_are_typed() {
    let p = pipeline(FakeToolchain::direct().failing_at("latex"), "texsvg-inv-err-latex-");
    match p.generate(&CompileRequest::new(r"\(\foo\)"), &SvgDocument::blank()) {
        Err(PipelineError::Compilation { exit_code, detail }) => {
            assert_eq!(exit_code, Some(1));
            assert!(detail.contains("! Undefined control sequence."));
        }
        other => panic!("expected compilation failure, got {:?}", other),
    }

    let p = pipeline(FakeToolchain::postscript().failing_at("dvips"), "texsvg-inv-err-dvips-");
    assert!(matches!(
        p.generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank()),
        Err(PipelineError::Conversion { stage: ConversionStage::DviToPs, .. })
    ));
    // The vectorizer never ran after the PostScript step failed.
    assert!(!p.runner().lines().iter().any(|l| l.starts_with("pstoedit -f")));

    let p = pipeline(FakeToolchain::postscript().failing_at("pstoedit"), "texsvg-inv-err-pstoedit-");
    assert!(matches!(
        p.generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank()),
        Err(PipelineError::Conversion { stage: ConversionStage::PsToSvg, exit_code: Some(1) })
    ));

    let p = pipeline(FakeToolchain::direct().failing_at("dvisvgm"), "texsvg-inv-err-dvisvgm-");
    assert!(matches!(
        p.generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank()),
        Err(PipelineError::Conversion { stage: ConversionStage::DviToSvg, exit_code: Some(1) })
    ));

    let p = pipeline(FakeToolchain::direct().emitting("<svg"), "texsvg-inv-err-import-");
    assert!(matches!(
        p.generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank()),
        Err(PipelineError::Import(_))
    ));
}

#[test]
fn invariant_empty_formula_runs_nothing() {
    let p = pipeline(FakeToolchain::direct(), "texsvg-inv-empty-");
    let result = p.generate(&CompileRequest::new("  \n"), &SvgDocument::blank());
    assert!(matches!(result, Err(PipelineError::EmptyFormula)));
    assert!(p.runner().lines().is_empty());
}

#[test]
fn invariant_unlaunchable_probe_is_fatal() {
    let prefix = "texsvg-inv-spawn-";
    let mut fake = FakeToolchain::direct();
    fake.unlaunchable = Some("dvips");
    let p = pipeline(fake, prefix);

    match p.generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank()) {
        Err(PipelineError::ProbeSpawn { tool, .. }) => assert_eq!(tool, "dvips"),
        other => panic!("expected probe failure, got {:?}", other),
    }
    assert!(leftovers(prefix).is_empty());
}

#[test]
fn invariant_references_stay_inside_group() {
    let p = pipeline(FakeToolchain::direct(), "texsvg-inv-refs-");
    let outcome = p
        .generate(&CompileRequest::new(r"\(x^2\)"), &SvgDocument::blank())
        .unwrap();

    let mut ids = vec![];
    all_ids(&outcome.group.element, &mut ids);
    let mut refs = vec![];
    hrefs(&outcome.group.element, &mut refs);

    assert_eq!(refs.len(), 2);
    for r in &refs {
        let target = r.strip_prefix('#').unwrap();
        assert!(ids.iter().any(|id| id == target), "{} dangles", r);
        assert!(target.starts_with("equation_00_"));
    }
}

#[test]
fn invariant_depth_is_bounded() {
    let nested = r#"<svg xmlns="http://www.w3.org/2000/svg">
<g id="outer"><g><g><path d="M0 0"/></g></g><path d="M1 1"/></g>
</svg>"#;
    let p = pipeline(FakeToolchain::direct().emitting(nested), "texsvg-inv-depth-");
    let outcome = p
        .generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank())
        .unwrap();
    // group, top-level copy, grandchild.
    assert_eq!(outcome.group.element.depth(), 3);
}

#[test]
fn invariant_repeated_inserts_never_collide() {
    let p = pipeline(FakeToolchain::direct(), "texsvg-inv-repeat-");
    let mut host = SvgDocument::parse(HOST).unwrap();

    let first = p.insert(&CompileRequest::new(r"\(a\)"), &mut host).unwrap();
    let second = p.insert(&CompileRequest::new(r"\(b\)"), &mut host).unwrap();
    assert_eq!(first.group.name, "equation_00");
    assert_eq!(second.group.name, "equation_01");

    let mut ids = vec![];
    all_ids(host.root(), &mut ids);
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());
}

#[test]
fn invariant_introduced_ids_are_new_to_host() {
    let p = pipeline(FakeToolchain::direct(), "texsvg-inv-fresh-");
    let mut host = SvgDocument::parse(
        r#"<svg xmlns="http://www.w3.org/2000/svg"><path id="equation_00_00" d="M0 0"/></svg>"#,
    )
    .unwrap();
    let before = host.ids();

    let outcome = p.insert(&CompileRequest::new(r"\(x\)"), &mut host).unwrap();
    assert_eq!(outcome.group.name, "equation_01");

    let mut introduced = vec![];
    all_ids(&outcome.group.element, &mut introduced);
    for id in &introduced {
        assert!(!before.contains(id), "{} already existed", id);
    }
    let mut ids = vec![];
    all_ids(host.root(), &mut ids);
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());
}

#[test]
fn invariant_naming_depends_only_on_existing_ids() {
    let host = SvgDocument::parse(HOST).unwrap();
    let a = pipeline(FakeToolchain::direct(), "texsvg-inv-name-a-")
        .generate(&CompileRequest::new(r"\(a\)"), &host)
        .unwrap();
    let b = pipeline(FakeToolchain::postscript(), "texsvg-inv-name-b-")
        .generate(&CompileRequest::new(r"\(b\)"), &host)
        .unwrap();
    assert_eq!(a.group.name, b.group.name);
}

#[test]
fn invariant_insert_lands_in_current_layer() {
    let p = pipeline(FakeToolchain::direct(), "texsvg-inv-layer-");
    let mut host = SvgDocument::parse(HOST).unwrap();
    p.insert(&CompileRequest::new(r"\(x^2\)"), &mut host).unwrap();

    let reparsed = SvgDocument::parse(&host.to_xml_string()).unwrap();
    let layer = reparsed
        .root()
        .find(&|e: &SvgElement| e.id() == Some("layer2"))
        .unwrap();
    let group = layer.elements().next().unwrap();
    assert_eq!(group.id(), Some("equation_00"));
    assert_eq!(group.attribute(&XName::local("title")), Some(r"\(x^2\)"));

    let ids = reparsed.ids();
    for kept in ["svg2", "base", "layer1", "rect10", "layer2", "equation_00_00", "equation_00_01"] {
        assert!(ids.contains(kept), "{} missing after round trip", kept);
    }
}

#[test]
fn invariant_package_lines_are_unique() {
    let request = CompileRequest::new(r"\(\bm{x}\)").with_packages("amsmath, b m,bm ,,mathrsfs");
    let source = tex_source(&request);

    assert_eq!(source.matches(r"\usepackage{amsmath}").count(), 1);
    assert_eq!(source.matches(r"\usepackage{bm}").count(), 1);
    assert_eq!(source.matches(r"\usepackage{mathrsfs}").count(), 1);
    assert!(!source.contains(r"\usepackage{}"));
    assert!(source.contains("\\begin{document}\n\\(\\bm{x}\\)\n\\end{document}"));
}

#[test]
fn invariant_trace_only_when_debugging() {
    let trace = Trace::default();
    let p = EquationPipeline::with_runner(
        ToolchainConfig {
            workspace_prefix: "texsvg-inv-trace-".to_string(),
            ..ToolchainConfig::default()
        },
        FakeToolchain::direct(),
        DiagnosticLog::to_writer(trace.clone()),
    );

    p.generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank())
        .unwrap();
    assert!(trace.text().is_empty());

    p.generate(&CompileRequest::new(r"\(x\)").with_debug(true), &SvgDocument::blank())
        .unwrap();
    let text = trace.text();
    assert!(text.contains("latex OK"));
    assert!(text.contains("typesetter and svg-converter process in use"));
    assert!(text.contains("eq.dvi file deleted"));
}

#[cfg(feature = "test-hooks")]
#[test]
fn invariant_cleanup_runs_once_per_run() {
    use texsvg_core::workspace::get_cleanup_call_count;

    let before = get_cleanup_call_count();
    let p = pipeline(FakeToolchain::direct().failing_at("dvisvgm"), "texsvg-inv-hook-");
    let _ = p.generate(&CompileRequest::new(r"\(x\)"), &SvgDocument::blank());
    assert!(get_cleanup_call_count() > before);
}
