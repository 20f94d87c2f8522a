//! Grammar and transformation extensions and their caching.

mod support;

use support::Project;
use weft_cache::ExtensionKind;
use weft_common::Term;
use weft_driver::UnitState;

const SHOUT: &str = "extension Shout | keyword shout | rewrite shout\n";

#[test]
fn extension_applies_to_the_rest_of_its_file() {
    let project = Project::new();
    project.write("Lang.wft", &format!("{SHOUT}shout Inner\n"));
    let lang = project.build(&project.context(), "Lang.wft");

    assert_eq!(lang.state, UnitState::Success, "{:?}", lang.errors);
    assert!(project.out("Shout.grm").exists());
    assert!(project.out("Shout.trn").exists());
    assert!(std::fs::read_to_string(project.out("Lang.txt")).unwrap().contains("shout Inner"));
    assert_eq!(project.toolchain.compound_compiles(ExtensionKind::Grammar, "Lang"), 2);
}

#[test]
fn importers_use_the_extension() {
    let project = Project::new();
    project.write("Lang.wft", SHOUT);
    project.write("User.wft", "import Lang\nshout Hello\n");
    let user = project.build(&project.context(), "User.wft");

    assert_eq!(user.state, UnitState::Success, "{:?}", user.errors);
    let grammar = std::fs::read_to_string(project.out("Lang.grm")).unwrap();
    assert!(grammar.starts_with("module Lang\nimports Shout\n"), "{grammar}");
    assert!(std::fs::read_to_string(project.out("User.txt")).unwrap().contains("shout Hello"));
}

#[test]
fn compiled_extensions_are_reused_by_a_new_process() {
    let project = Project::new();
    project.write("Lang.wft", SHOUT);
    project.write("User.wft", "import Lang\nshout Hello\n");
    project.build(&project.context(), "User.wft");
    let grammars = project.toolchain.module_compiles(ExtensionKind::Grammar);
    let transformations = project.toolchain.module_compiles(ExtensionKind::Transformation);

    project.write("User.wft", "import Lang\nshout Hello\nclass More\n");
    let user = project.build(&project.context(), "User.wft");
    assert_eq!(user.state, UnitState::Success, "{:?}", user.errors);
    assert_eq!(project.toolchain.module_compiles(ExtensionKind::Grammar), grammars);
    assert_eq!(project.toolchain.module_compiles(ExtensionKind::Transformation), transformations);
}

#[test]
fn namespaced_extension() {
    let project = Project::new();
    project.write("Lang.wft", &format!("package acme\n{SHOUT}"));
    project.write("User.wft", "import Lang\nshout Hello\n");
    let user = project.build(&project.context(), "User.wft");

    assert_eq!(user.state, UnitState::Success, "{:?}", user.errors);
    assert!(project.out("acme/Shout.grm").exists());
}

#[test]
fn editor_services_reach_importers() {
    let project = Project::new();
    project.write("Lang.wft", "extension Ed | keyword ed | rewrite ed | editor outline\n");
    project.write("User.wft", "import Lang\ned Thing\n");
    let user = project.build(&project.context(), "User.wft");

    assert_eq!(user.state, UnitState::Success, "{:?}", user.errors);
    assert!(project.out("Ed.serv").exists());
    assert!(user.editor_services.contains(&Term::string("outline")));
}

#[test]
fn atomic_imports_compile_each_compound_once() {
    let write = |project: &Project| {
        project.write("L1.wft", "extension E1 | keyword one | rewrite one\n");
        project.write("L2.wft", "extension E2 | keyword two | rewrite two\n");
        project.write("User.wft", "import L1\nimport L2\none X\ntwo Y\n");
    };

    let project = Project::new();
    write(&project);
    let user = project.build(&project.context(), "User.wft");
    assert_eq!(user.state, UnitState::Success, "{:?}", user.errors);
    assert_eq!(project.toolchain.compound_compiles(ExtensionKind::Grammar, "User"), 3);
    assert_eq!(project.toolchain.compound_compiles(ExtensionKind::Transformation, "User"), 3);

    let atomic = Project::new();
    write(&atomic);
    let ctx = atomic.context_with(|env| env.atomic_import_parsing = true);
    let user = atomic.build(&ctx, "User.wft");
    assert_eq!(user.state, UnitState::Success, "{:?}", user.errors);
    assert_eq!(atomic.toolchain.compound_compiles(ExtensionKind::Grammar, "User"), 2);
    // Imports parsed ahead are resolved as written, without running the
    // transformation in effect before the block.
    assert_eq!(atomic.toolchain.compound_compiles(ExtensionKind::Transformation, "User"), 2);
}
