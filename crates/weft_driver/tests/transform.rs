//! Transformation imports, generated models and exports.

mod support;

use support::Project;
use weft_common::Term;
use weft_diagnostics::Severity;
use weft_driver::{Generation, UnitState};

fn read_model(path: &std::path::Path) -> Term {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn transform_project() -> Project {
    let project = Project::new();
    project.write("Data.wft", "model Data\n");
    project.write("T.wft", "transformation T main = identity\n");
    project
}

#[test]
fn transformed_model_is_built_as_its_own_unit() {
    let project = transform_project();
    project.write("App.wft", "transimport T Data\n");
    let ctx = project.context();

    let app = project.build(&ctx, "App.wft");
    assert_eq!(app.state, UnitState::Success, "{:?}", app.errors);

    let generated = project.out("Data__T.model");
    assert_eq!(
        read_model(&generated).to_string(),
        r#"CompilationUnit([ModelDec("Data__T")])"#
    );
    assert!(app.generated_files.contains_key(&generated));

    let unit = ctx.store().read(&project.out("Data__T.model.dep")).unwrap();
    assert_eq!(unit.state, UnitState::Success);
    assert_eq!(
        unit.generation,
        Some(Generation {
            model: project.out("Data.dep"),
            transformation: project.out("T.dep"),
        })
    );
    assert!(app
        .module_deps
        .iter()
        .any(|d| d.dep_path == project.out("Data__T.model.dep")));
}

#[test]
fn transformed_model_is_regenerated_when_its_model_changes() {
    let project = transform_project();
    project.write("App.wft", "transimport T Data\n");
    let ctx = project.context();
    project.build(&ctx, "App.wft");

    let parses = project.toolchain.parses.load(std::sync::atomic::Ordering::SeqCst);
    project.build(&ctx, "App.wft");
    assert_eq!(project.toolchain.parses.load(std::sync::atomic::Ordering::SeqCst), parses);

    project.write("Data.wft", "model Data\nplain Data xml <d/>\n");
    let app = project.build(&ctx, "App.wft");
    assert_eq!(app.state, UnitState::Success, "{:?}", app.errors);
    let model = read_model(&project.out("Data__T.model")).to_string();
    assert!(model.contains(r#"PlainDec("Data__T",Some("xml"),"<d/>")"#), "{model}");
    assert_eq!(std::fs::read_to_string(project.out("Data__T.xml")).unwrap(), "<d/>");
}

#[test]
fn later_declarations_see_the_transformed_name() {
    let project = transform_project();
    project.write("App.wft", "transimport T Data\nplain App ref Data\n");
    project.write("Alias.wft", "transimport T Data as D\nplain Alias ref D\n");
    let ctx = project.context();

    let app = project.build(&ctx, "App.wft");
    assert_eq!(app.state, UnitState::Success, "{:?}", app.errors);
    assert_eq!(std::fs::read_to_string(project.out("App.ref")).unwrap(), "Data__T");

    let alias = project.build(&ctx, "Alias.wft");
    assert_eq!(alias.state, UnitState::Success, "{:?}", alias.errors);
    assert_eq!(std::fs::read_to_string(project.out("Alias.ref")).unwrap(), "Data__T");
}

#[test]
fn hidden_dependency_of_generated_model_is_rejected() {
    let project = Project::new();
    project.write("Data.wft", "model Data\n");
    project.write("Hidden.wft", "class Hidden\n");
    project.write("T.wft", "transformation T main = addimport Hidden\n");
    project.write("App.wft", "transimport T Data\n");

    let app = project.build(&project.context(), "App.wft");
    assert_eq!(app.state, UnitState::Failure);
    let expected = format!(
        "generated model has dependencies not visible to its generators: {}",
        project.out("Hidden.dep").display()
    );
    assert!(app.errors.contains(&expected), "{:?}", app.errors);
}

#[test]
fn dependency_visible_to_the_transformation_is_accepted() {
    let project = Project::new();
    project.write("Data.wft", "model Data\n");
    project.write("Hidden.wft", "class Hidden\n");
    project.write("T.wft", "import Hidden\ntransformation T main = addimport Hidden\n");
    project.write("App.wft", "transimport T Data\n");

    let app = project.build(&project.context(), "App.wft");
    assert_eq!(app.state, UnitState::Success, "{:?}", app.errors);
}

#[test]
fn library_transformation_without_record_is_applied_unchecked() {
    let project = Project::new();
    project.write("Data.wft", "model Data\n");
    std::fs::write(
        project.root().join("lib").join("T.trn"),
        "module T\nimports std/lib-transformation\nmain-T = identity\n",
    )
    .unwrap();
    project.write("App.wft", "transimport T Data\n");
    let ctx = project.context();

    let app = project.build(&ctx, "App.wft");
    assert_eq!(app.state, UnitState::Success, "{:?}", app.errors);
    assert!(project.out("Data__T.model").exists());
    let unit = ctx.store().read(&project.out("Data__T.model.dep")).unwrap();
    assert_eq!(unit.generation, None);

    let expected = "dependencies of generated model Data__T are not checked: T has no unit record";
    assert!(
        app.analysis
            .iter()
            .any(|m| m.severity == Severity::Warning && m.message == expected),
        "{:?}",
        app.analysis
    );
}

#[test]
fn missing_transformation_is_reported() {
    let project = Project::new();
    project.write("Data.wft", "model Data\n");
    project.write("App.wft", "transimport Nope Data\n");
    let app = project.build(&project.context(), "App.wft");
    assert_eq!(app.state, UnitState::Failure);
    assert!(app.errors.iter().any(|e| e.contains("transformation not found: Nope")), "{:?}", app.errors);
}

#[test]
fn export_publishes_a_renamed_model() {
    let project = Project::new();
    project.write("Data.wft", "model Data\n");
    project.write("Pub.wft", "export Pub from Data\n");
    project.write("User.wft", "import Pub\n");
    let ctx = project.context();

    let publ = project.build(&ctx, "Pub.wft");
    assert_eq!(publ.state, UnitState::Success, "{:?}", publ.errors);
    assert_eq!(
        read_model(&project.out("Pub.model")).to_string(),
        r#"CompilationUnit([ModelDec("Pub")])"#
    );
    assert!(publ
        .module_deps
        .iter()
        .any(|d| d.dep_path == project.out("Pub.model.dep")));

    let user = project.build(&ctx, "User.wft");
    assert_eq!(user.state, UnitState::Success, "{:?}", user.errors);
}

#[test]
fn export_of_unknown_module_fails() {
    let project = Project::new();
    project.write("Pub.wft", "export Pub from Nowhere\n");
    let publ = project.build(&project.context(), "Pub.wft");
    assert_eq!(publ.state, UnitState::Failure);
    assert!(
        publ.errors.iter().any(|e| e.contains("Could not resolve model for export: Nowhere")),
        "{:?}",
        publ.errors
    );
}
