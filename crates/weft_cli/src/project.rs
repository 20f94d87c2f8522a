//! Project discovery shared by the CLI commands: locating `weft.toml`,
//! loading it with command-line overrides, and finding source files.

use std::path::{Path, PathBuf};

use weft_config::{ProjectConfig, CONFIG_FILE};

use crate::{BuildArgs, GlobalArgs};

/// Walks up from `start` looking for the nearest directory containing `weft.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(CONFIG_FILE).is_file() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(format!(
                "could not find `{CONFIG_FILE}` in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory looking for `weft.toml`.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(ref config_path) = global.config {
        let p = PathBuf::from(config_path);
        if p.is_file() {
            Ok(p.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")))
        } else {
            Ok(p)
        }
    } else {
        find_project_root(&std::env::current_dir()?)
    }
}

/// Loads the project configuration, with `weft build` flags taking precedence.
pub fn load_with_overrides(
    project_dir: &Path,
    args: Option<&BuildArgs>,
) -> Result<ProjectConfig, Box<dyn std::error::Error>> {
    let mut config = weft_config::load_config(project_dir)?;
    if let Some(args) = args {
        config.project.include_path.extend(args.include.iter().cloned());
        if let Some(out_dir) = &args.out_dir {
            config.project.out_dir = out_dir.clone();
        }
        if let Some(cache_dir) = &args.cache_dir {
            config.project.cache_dir = cache_dir.clone();
        }
        config.build.atomic_import_parsing |= args.atomic_imports;
        config.build.no_checking |= args.no_checking;
        if args.sequential {
            config.build.parallel = false;
        }
        weft_config::validate_config(&config)?;
    }
    Ok(config)
}

/// Discovers files with extension `ext` below each root (recursive), sorted by path.
///
/// Missing roots are skipped.
pub fn discover_source_files(roots: &[PathBuf], ext: &str) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    for root in roots.iter().filter(|r| r.is_dir()) {
        walk_dir(root, ext, &mut files)?;
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn walk_dir(dir: &Path, ext: &str, files: &mut Vec<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, ext, files)?;
        } else if path.extension().is_some_and(|e| e == ext) {
            files.push(path);
        }
    }
    Ok(())
}

/// Makes a command-line path absolute against the current directory.
pub fn absolute(path: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
