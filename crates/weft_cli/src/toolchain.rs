//! Toolchain adapter that runs external programs.
//!
//! Each step is an argument vector from `[toolchain]` in `weft.toml`. The
//! program receives one JSON request on stdin and answers with one JSON
//! document on stdout. A non-zero exit status fails the step with the
//! program's stderr as the message.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use weft_common::Term;
use weft_config::ToolchainConfig;
use weft_cache::ExtensionKind;
use weft_driver::{
    AnalysisMessage, BaseCompiler, CompileJob, ExtensionToolchain, ParseError, ParsedDeclaration, ToolchainError,
};

#[derive(Serialize)]
struct CompileModuleRequest<'a> {
    source: &'a Path,
    artifact: &'a Path,
    search_path: &'a [PathBuf],
}

#[derive(Serialize)]
struct ParseRequest<'a> {
    grammar: &'a Path,
    input: &'a str,
    recovery: bool,
}

#[derive(Deserialize)]
struct ParseResponse {
    term: Term,
    consumed: usize,
    #[serde(default)]
    errors: Vec<ParseError>,
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum ProgramRequest<'a> {
    Execute {
        program: &'a Path,
        rule: &'a str,
        term: &'a Term,
        args: &'a [Term],
    },
    Analyze {
        program: &'a Path,
        term: &'a Term,
    },
}

#[derive(Serialize)]
struct CompileBaseRequest<'a> {
    sources: &'a [PathBuf],
    out_dir: &'a Path,
    include_path: &'a [PathBuf],
}

#[derive(Deserialize)]
struct CompileBaseResponse {
    produced: BTreeSet<PathBuf>,
}

/// Runs configured external programs for every toolchain step.
pub struct CommandToolchain {
    config: ToolchainConfig,
}

impl CommandToolchain {
    /// Creates the adapter from the `[toolchain]` section.
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    /// Runs `argv` with `request` on stdin and returns its stdout.
    fn run(&self, step: &str, argv: &[String], request: &impl Serialize) -> Result<Vec<u8>, ToolchainError> {
        let (program, args) = argv.split_first().ok_or_else(|| ToolchainError::Unavailable {
            step: step.to_string(),
        })?;
        let input = serde_json::to_vec(request).map_err(|e| protocol(step, e))?;
        let spawn_error = |source: std::io::Error| ToolchainError::Spawn {
            program: program.clone(),
            source,
        };

        debug!(step, program = %program, "running toolchain step");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        // stdin is fed from its own thread while stdout drains.
        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || match stdin {
            Some(mut stdin) => stdin.write_all(&input),
            None => Ok(()),
        });
        let output = child.wait_with_output().map_err(spawn_error)?;
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(spawn_error(e)),
            Err(_) => return Err(ToolchainError::failed(step, "stdin writer panicked")),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim() {
                "" => format!("exited with {}", output.status),
                text => text.to_string(),
            };
            return Err(ToolchainError::failed(step, message));
        }
        Ok(output.stdout)
    }

    fn call<T: DeserializeOwned>(
        &self,
        step: &str,
        argv: &[String],
        request: &impl Serialize,
    ) -> Result<T, ToolchainError> {
        let stdout = self.run(step, argv, request)?;
        serde_json::from_slice(&stdout).map_err(|e| protocol(step, e))
    }
}

fn protocol(step: &str, error: serde_json::Error) -> ToolchainError {
    ToolchainError::Protocol {
        step: step.to_string(),
        message: error.to_string(),
    }
}

impl ExtensionToolchain for CommandToolchain {
    fn compile_module(
        &self,
        kind: ExtensionKind,
        source: &Path,
        artifact: &Path,
        search_path: &[PathBuf],
    ) -> Result<(), ToolchainError> {
        let (step, argv) = match kind {
            ExtensionKind::Grammar => ("compile grammar", &self.config.compile_grammar),
            ExtensionKind::Transformation => ("compile transformation", &self.config.compile_transformation),
        };
        let request = CompileModuleRequest {
            source,
            artifact,
            search_path,
        };
        self.run(step, argv, &request)?;
        if !artifact.is_file() {
            return Err(ToolchainError::Protocol {
                step: step.to_string(),
                message: format!("no artifact written to {}", artifact.display()),
            });
        }
        Ok(())
    }

    fn parse(&self, grammar: &Path, input: &str, recovery: bool) -> Result<ParsedDeclaration, ToolchainError> {
        let request = ParseRequest {
            grammar,
            input,
            recovery,
        };
        let response: ParseResponse = self.call("parse", &self.config.parse, &request)?;
        Ok(ParsedDeclaration {
            term: response.term,
            consumed: response.consumed,
            errors: response.errors,
        })
    }

    fn execute(&self, program: &Path, rule: &str, term: &Term, args: &[Term]) -> Result<Term, ToolchainError> {
        let request = ProgramRequest::Execute {
            program,
            rule,
            term,
            args,
        };
        self.call(rule, &self.config.execute, &request)
    }

    fn analyze(&self, program: &Path, term: &Term) -> Result<Vec<AnalysisMessage>, ToolchainError> {
        if self.config.execute.is_empty() {
            return Ok(Vec::new());
        }
        self.call("analyze", &self.config.execute, &ProgramRequest::Analyze { program, term })
    }
}

impl BaseCompiler for CommandToolchain {
    fn compile(&self, job: &CompileJob) -> Result<BTreeSet<PathBuf>, ToolchainError> {
        let request = CompileBaseRequest {
            sources: &job.sources,
            out_dir: &job.out_dir,
            include_path: &job.include_path,
        };
        let response: CompileBaseResponse = self.call("compile base", &self.config.compile_base, &request)?;
        Ok(response.produced)
    }
}
