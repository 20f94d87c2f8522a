//! `weft build`: compile source files and everything they import.
//!
//! 1. Find the project root and load `weft.toml` with flag overrides
//! 2. Collect the files to build (arguments, or every source file)
//! 3. Set up the build context with the command-line toolchain
//! 4. Build all files, in parallel unless disabled
//! 5. Render diagnostics and map the results to an exit code

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;
use weft_diagnostics::{DiagnosticRenderer, DiagnosticSink, TerminalRenderer};
use weft_driver::{
    BuildContext, BuildRequest, CompilationUnit, Environment, ProcessingListener, ShapeLanguage, SourceSet,
    UnitState,
};

use crate::project::{absolute, discover_source_files, load_with_overrides, resolve_project_root};
use crate::report::{emit_failure, emit_unit, ExitStatus};
use crate::toolchain::CommandToolchain;
use crate::{BuildArgs, GlobalArgs, ReportFormat};

/// Prints a progress line per unit that actually runs its pipeline.
struct ProgressListener;

impl ProcessingListener for ProgressListener {
    fn processing_starts(&self, sources: &SourceSet) {
        eprintln!("   Compiling {sources}");
    }

    fn processing_done(&self, unit: &CompilationUnit) {
        if unit.state == UnitState::Failure {
            eprintln!("      Failed {}", unit.sources);
        }
    }
}

/// Runs the `weft build` command.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let config = load_with_overrides(&project_dir, Some(args))?;
    let env = Environment::from_config(&project_dir, &config);

    let files = if args.files.is_empty() {
        discover_source_files(&env.source_path, &config.language.source_extension)?
    } else {
        args.files.iter().map(|f| absolute(f)).collect::<Result<Vec<_>, _>>()?
    };
    if files.is_empty() {
        if !global.quiet {
            eprintln!("warning: no source files found");
        }
        return Ok(ExitStatus::Success.code());
    }
    if !global.quiet {
        eprintln!("    Building {} ({} file(s))", config.project.name, files.len());
    }

    let toolchain = Arc::new(CommandToolchain::new(config.toolchain.clone()));
    let language = Arc::new(ShapeLanguage::new(config.language.clone(), toolchain.clone()));
    let ctx = BuildContext::new(env, language, toolchain)?;
    if !global.quiet {
        ctx.add_listener(Arc::new(ProgressListener));
    }

    let started = Instant::now();
    let requests: Vec<BuildRequest> = files.into_iter().map(BuildRequest::new).collect();
    let results = if config.build.parallel {
        ctx.build_all(requests)
    } else {
        requests.into_iter().map(|r| ctx.build(r)).collect()
    };
    if let Err(e) = ctx.save_caches() {
        warn!(error = %e, "could not save the extension cache");
    }

    let sink = DiagnosticSink::new();
    let mut status = ExitStatus::Success;
    for result in &results {
        match result {
            Ok(unit) => {
                emit_unit(unit, &sink);
                status = status.max(ExitStatus::of_unit(unit));
            }
            Err(e) => {
                emit_failure(e, &sink);
                status = ExitStatus::Failure;
            }
        }
    }

    let diagnostics = sink.take_all();
    match args.format {
        ReportFormat::Text => {
            let renderer = TerminalRenderer::new(global.color);
            for diag in &diagnostics {
                eprint!("{}", renderer.render(diag));
            }
            if !global.quiet {
                eprintln!(
                    "    Finished {} unit(s) in {:.2}s: {} error(s)",
                    results.len(),
                    started.elapsed().as_secs_f64(),
                    diagnostics.iter().filter(|d| d.severity.is_error()).count()
                );
            }
        }
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&diagnostics)?);
        }
    }

    Ok(status.code())
}
