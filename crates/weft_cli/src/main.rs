//! Weft CLI, the command-line front end of the incremental build driver.
//!
//! Provides `weft build` for compiling source files and their imports,
//! `weft gc` for pruning unreferenced compiled extension modules, and
//! `weft clean` for dropping the extension cache.

#![warn(missing_docs)]

mod build;
mod clean;
mod project;
mod report;
mod toolchain;

use std::process;
use std::sync::Once;

use clap::{Parser, Subcommand, ValueEnum};

/// Weft, an incremental compiler driver for extensible languages.
#[derive(Parser, Debug)]
#[command(name = "weft", version, about = "Weft build driver")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Control colored output.
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Path to a custom `weft.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build source files and everything they import.
    Build(BuildArgs),
    /// Delete compiled extension modules no cache entry refers to.
    Gc,
    /// Delete the extension cache directory.
    Clean {
        /// Also delete the output directory with its unit records.
        #[arg(long)]
        all: bool,
    },
}

/// Arguments for the `weft build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Source files to build. Defaults to every source file on the source path.
    pub files: Vec<String>,

    /// Extra directories searched for compiled modules.
    #[arg(short = 'I', long = "include", num_args = 1..)]
    pub include: Vec<String>,

    /// Output directory for generated files and unit records.
    #[arg(short, long)]
    pub out_dir: Option<String>,

    /// Directory of the extension cache.
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Resolve runs of consecutive imports as one block.
    #[arg(long)]
    pub atomic_imports: bool,

    /// Skip the final grammar check of each unit.
    #[arg(long)]
    pub no_checking: bool,

    /// Build files one after another instead of in parallel.
    #[arg(long)]
    pub sequential: bool,

    /// Output format for diagnostics.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Controls whether colored output is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Detect from terminal capabilities.
    Auto,
    /// Always produce colored output.
    Always,
    /// Never produce colored output.
    Never,
}

/// Diagnostic output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Whether to use colored output.
    pub color: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

static TRACING_INIT: Once = Once::new();

/// Installs the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `--verbose` turns on debug output of
/// the weft crates and everything else stays at warnings.
fn init_tracing(verbose: bool) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let filter = match std::env::var("RUST_LOG") {
            Ok(_) => EnvFilter::from_default_env(),
            Err(_) if verbose => EnvFilter::new("warn,weft=debug"),
            Err(_) => EnvFilter::new("warn"),
        };
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    });
}

fn main() {
    let cli = Cli::parse();

    let color = match cli.color {
        ColorChoice::Auto => std::env::var("TERM").is_ok_and(|t| t != "dumb"),
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        color,
        config: cli.config,
    };
    init_tracing(global.verbose);

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Gc => clean::run_gc(&global),
        Command::Clean { all } => clean::run_clean(all, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(report::ExitStatus::Failure.code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_build_default() {
        let cli = Cli::parse_from(["weft", "build"]);
        match cli.command {
            Command::Build(ref args) => {
                assert!(args.files.is_empty());
                assert!(args.include.is_empty());
                assert!(args.out_dir.is_none());
                assert!(args.cache_dir.is_none());
                assert!(!args.atomic_imports);
                assert!(!args.no_checking);
                assert!(!args.sequential);
                assert_eq!(args.format, ReportFormat::Text);
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn parse_build_with_args() {
        let cli = Cli::parse_from([
            "weft",
            "build",
            "src/app/Main.wft",
            "src/app/Other.wft",
            "--include",
            "lib",
            "vendor",
            "--out-dir",
            "target/weft",
            "--cache-dir",
            "/tmp/weft-cache",
            "--atomic-imports",
            "--no-checking",
            "--format",
            "json",
        ]);
        match cli.command {
            Command::Build(ref args) => {
                assert_eq!(args.files, vec!["src/app/Main.wft", "src/app/Other.wft"]);
                assert_eq!(args.include, vec!["lib", "vendor"]);
                assert_eq!(args.out_dir.as_deref(), Some("target/weft"));
                assert_eq!(args.cache_dir.as_deref(), Some("/tmp/weft-cache"));
                assert!(args.atomic_imports);
                assert!(args.no_checking);
                assert_eq!(args.format, ReportFormat::Json);
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn parse_short_include() {
        let cli = Cli::parse_from(["weft", "build", "-I", "lib", "--sequential"]);
        match cli.command {
            Command::Build(ref args) => {
                assert_eq!(args.include, vec!["lib"]);
                assert!(args.sequential);
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn parse_gc_and_clean() {
        assert!(matches!(Cli::parse_from(["weft", "gc"]).command, Command::Gc));
        assert!(matches!(
            Cli::parse_from(["weft", "clean"]).command,
            Command::Clean { all: false }
        ));
        assert!(matches!(
            Cli::parse_from(["weft", "clean", "--all"]).command,
            Command::Clean { all: true }
        ));
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::parse_from(["weft", "--quiet", "--color", "never", "build"]);
        assert!(cli.quiet);
        assert!(!cli.verbose);
        assert_eq!(cli.color, ColorChoice::Never);
    }

    #[test]
    fn parse_verbose_after_subcommand() {
        let cli = Cli::parse_from(["weft", "gc", "--verbose"]);
        assert!(cli.verbose);
        assert_eq!(cli.color, ColorChoice::Auto);
    }

    #[test]
    fn parse_config_path() {
        let cli = Cli::parse_from(["weft", "--config", "/path/to/weft.toml", "build"]);
        assert_eq!(cli.config.as_deref(), Some("/path/to/weft.toml"));
    }
}
