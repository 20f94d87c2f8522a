//! `weft gc` and `weft clean`.

use std::path::Path;
use std::sync::Arc;

use weft_driver::{BuildContext, Environment, ShapeLanguage};

use crate::project::{load_with_overrides, resolve_project_root};
use crate::toolchain::CommandToolchain;
use crate::GlobalArgs;

/// Runs `weft gc`: deletes compiled extension modules that no cache entry references.
pub fn run_gc(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let config = load_with_overrides(&project_dir, None)?;
    let env = Environment::from_config(&project_dir, &config);

    let toolchain = Arc::new(CommandToolchain::new(config.toolchain.clone()));
    let language = Arc::new(ShapeLanguage::new(config.language.clone(), toolchain.clone()));
    let ctx = BuildContext::new(env, language, toolchain)?;
    let removed = ctx.collect_garbage()?;

    if !global.quiet {
        eprintln!("     Removed {removed} unreferenced extension module(s)");
    }
    Ok(0)
}

/// Runs `weft clean`: deletes the extension cache, and with `all` the output directory too.
pub fn run_clean(all: bool, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let config = load_with_overrides(&project_dir, None)?;
    let env = Environment::from_config(&project_dir, &config);

    remove_dir(&env.cache_dir, global)?;
    if all {
        remove_dir(&env.out_dir, global)?;
    }
    Ok(0)
}

fn remove_dir(dir: &Path, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    if dir.is_dir() {
        std::fs::remove_dir_all(dir)?;
        if !global.quiet {
            eprintln!("     Removed {}", dir.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, GlobalArgs) {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("weft.toml"), "[project]\nname = \"demo\"\n").unwrap();
        let global = GlobalArgs {
            quiet: true,
            verbose: false,
            color: false,
            config: Some(tmp.path().to_str().unwrap().to_string()),
        };
        (tmp, global)
    }

    #[test]
    fn clean_removes_cache_only() {
        let (tmp, global) = project();
        fs::create_dir_all(tmp.path().join(".weft-cache/grammar")).unwrap();
        fs::create_dir_all(tmp.path().join("bin")).unwrap();

        assert_eq!(run_clean(false, &global).unwrap(), 0);
        assert!(!tmp.path().join(".weft-cache").exists());
        assert!(tmp.path().join("bin").exists());

        assert_eq!(run_clean(true, &global).unwrap(), 0);
        assert!(!tmp.path().join("bin").exists());
    }

    #[test]
    fn gc_on_fresh_cache() {
        let (tmp, global) = project();
        assert_eq!(run_gc(&global).unwrap(), 0);
        assert!(tmp.path().join(".weft-cache").is_dir());
    }
}
