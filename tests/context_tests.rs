//! Context pipeline behaviour: parsing diagnostics, module creation,
//! package-include gating, and source-root filtering.

mod common;

use blueprint::{Context, PACKAGE_INCLUDES_TYPE};
use common::{BarProperties, FooProperties, parse_and_resolve, test_context};
use serde::Serialize;

fn rendered(errs: &[blueprint::Error]) -> Vec<String> {
    errs.iter().map(ToString::to_string).collect()
}

#[test]
fn parse_builds_graph_from_blueprint_file() {
    let mut ctx = test_context(&[(
        "Blueprints",
        r#"
        foo_module {
            name: "MyFooModule",
            deps: ["MyBarModule"],
        }

        bar_module {
            name: "MyBarModule",
        }
        "#,
    )]);
    parse_and_resolve(&mut ctx, "Blueprints");
    assert!(ctx.module_by_name("MyFooModule").is_some());
    assert!(ctx.module_by_name("MyBarModule").is_some());
}

#[test]
fn module_without_name_is_a_property_error() {
    let mut ctx = test_context(&[(
        "Blueprints",
        "\nfoo_module {\n    name: \"A\",\n}\n\nbar_module {\n    deps: [\"A\"],\n}\n",
    )]);
    let (_, errs) = ctx.parse_blueprints_files("Blueprints");
    assert_eq!(
        rendered(&errs),
        vec!["Blueprints:6:1: property 'name' is missing from a module"]
    );
}

#[test]
fn duplicate_module_reports_both_definitions() {
    let mut ctx = test_context(&[(
        "Blueprints",
        "foo_module { name: \"A\" }\nfoo_module { name: \"A\" }\n",
    )]);
    let (_, errs) = ctx.parse_blueprints_files("Blueprints");
    let rendered = rendered(&errs);
    assert_eq!(rendered.len(), 2, "expected two errors: {rendered:?}");
    assert!(rendered[0].contains("module \"A\" already defined"));
    assert!(rendered[1].contains("previous definition here"));
}

#[test]
fn unknown_module_type_is_reported() {
    let mut ctx = test_context(&[("Blueprints", "mystery_module { name: \"A\" }")]);
    let (_, errs) = ctx.parse_blueprints_files("Blueprints");
    assert_eq!(errs.len(), 1);
    assert!(
        errs[0]
            .to_string()
            .contains("unrecognised module type \"mystery_module\"")
    );
}

#[test]
fn unknown_property_is_reported() {
    let mut ctx = test_context(&[(
        "Blueprints",
        "foo_module { name: \"A\", mystery: true }",
    )]);
    let (_, errs) = ctx.parse_blueprints_files("Blueprints");
    assert_eq!(errs.len(), 1);
    assert!(errs[0].to_string().contains("mystery"));
}

#[test]
fn undefined_dependency_is_reported_at_resolve() {
    let mut ctx = test_context(&[(
        "Blueprints",
        "foo_module { name: \"A\", deps: [\"Ghost\"] }",
    )]);
    let (_, errs) = ctx.parse_blueprints_files("Blueprints");
    assert!(errs.is_empty());
    let errs = ctx.resolve_dependencies(None);
    assert_eq!(errs.len(), 1);
    assert!(
        errs[0]
            .to_string()
            .contains("\"A\" depends on undefined module \"Ghost\"")
    );
}

#[test]
fn self_dependency_is_reported() {
    let mut ctx = test_context(&[("Blueprints", "foo_module { name: \"A\", deps: [\"A\"] }")]);
    let (_, errs) = ctx.parse_blueprints_files("Blueprints");
    assert!(errs.is_empty());
    let errs = ctx.resolve_dependencies(None);
    assert_eq!(errs.len(), 1);
    assert!(errs[0].to_string().contains("depends on itself"));
}

#[test]
fn dependency_cycle_is_reported() {
    let mut ctx = test_context(&[(
        "Blueprints",
        r#"
        foo_module { name: "A", deps: ["B"] }
        foo_module { name: "B", deps: ["A"] }
        "#,
    )]);
    let (_, errs) = ctx.parse_blueprints_files("Blueprints");
    assert!(errs.is_empty());
    let errs = ctx.resolve_dependencies(None);
    let rendered = rendered(&errs);
    assert_eq!(rendered[0], "encountered dependency cycle");
    assert!(rendered.len() >= 3, "expected cycle edges: {rendered:?}");
    assert!(rendered.contains(&"module \"A\" depends on module \"B\"".to_owned()));
    assert!(rendered.contains(&"module \"B\" depends on module \"A\"".to_owned()));
}

#[derive(Serialize)]
struct CreatedProps {
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    deps: Vec<String>,
}

/// A top-down mutator may create modules; they are committed at the end of
/// its pass and resolve dependencies in later mutators like parsed modules.
#[test]
fn top_down_mutator_creates_modules() {
    // The creation mutator must run before the deps mutator, so build the
    // context by hand to control registration order.
    let mut ctx2 = Context::new();
    ctx2.mock_file_system([("Blueprints", "foo_module { name: \"A\", deps: [\"B\", \"C\"] }")]);
    ctx2.register_module_type("foo_module", |properties: FooProperties| common::FooModule {
        properties,
    });
    ctx2.register_module_type("bar_module", |properties: BarProperties| common::BarModule {
        properties,
    });
    ctx2.register_top_down_mutator("create", |mctx| {
        mctx.create_module(
            "bar_module",
            CreatedProps {
                name: "B".to_owned(),
                deps: vec!["D".to_owned()],
            },
        );
        mctx.create_module(
            "bar_module",
            CreatedProps {
                name: "C".to_owned(),
                deps: vec!["D".to_owned()],
            },
        );
        mctx.create_module(
            "foo_module",
            CreatedProps {
                name: "D".to_owned(),
                deps: Vec::new(),
            },
        );
    });
    ctx2.register_bottom_up_mutator("deps", common::deps_mutator);

    parse_and_resolve(&mut ctx2, "Blueprints");

    let deps_of = |name: &str| {
        let id = ctx2.module_by_name(name).expect("module");
        let mut deps = Vec::new();
        ctx2.visit_direct_deps(id, |dep| deps.push(ctx2.module_name(dep.id).to_owned()));
        deps.join(",")
    };
    assert_eq!(deps_of("A"), "B,C");
    assert_eq!(deps_of("B"), "D");
    assert_eq!(deps_of("C"), "D");
    assert_eq!(deps_of("D"), "");
}

fn package_includes_fs() -> Vec<(&'static str, String)> {
    let file = |tag: &str| {
        format!(
            "{PACKAGE_INCLUDES_TYPE} {{\n    match_all: [\"{tag}\"],\n}}\nfoo_module {{\n    name: \"foo\",\n}}\n"
        )
    };
    vec![
        ("dir1/Blueprints", file("use_dir1")),
        ("dir2/Blueprints", file("use_dir2")),
    ]
}

#[test]
fn package_includes_select_matching_directory() {
    for (tag, expected_dir) in [("use_dir1", "dir1"), ("use_dir2", "dir2")] {
        let files = package_includes_fs();
        let mut ctx = Context::new();
        ctx.mock_file_system(files.iter().map(|(p, c)| (*p, c.clone())));
        ctx.register_module_type("foo_module", |properties: FooProperties| common::FooModule {
            properties,
        });
        ctx.add_include_tags([tag]);
        let (_, errs) = ctx.parse_file_list(".", &["dir1/Blueprints", "dir2/Blueprints"]);
        assert!(errs.is_empty(), "unexpected errors for {tag}: {errs:?}");
        let id = ctx.module_by_name("foo").expect("foo");
        assert_eq!(ctx.module_dir(id).as_str(), expected_dir);
    }
}

/// With both include tags set, both files keep their `foo` and the second
/// definition is a duplicate-module error.
#[test]
fn package_includes_conflict_is_duplicate_module() {
    let files = package_includes_fs();
    let mut ctx = Context::new();
    ctx.mock_file_system(files.iter().map(|(p, c)| (*p, c.clone())));
    ctx.register_module_type("foo_module", |properties: FooProperties| common::FooModule {
        properties,
    });
    ctx.add_include_tags(["use_dir1", "use_dir2"]);
    let (_, errs) = ctx.parse_file_list(".", &["dir1/Blueprints", "dir2/Blueprints"]);
    assert!(
        errs.iter()
            .any(|err| err.to_string().contains("module \"foo\" already defined")),
        "expected duplicate error, got {errs:?}"
    );
}

/// Files outside the allowed source roots still parse, but their modules are
/// suppressed and depending on one is an error naming the deciding prefix.
#[test]
fn source_root_filtering_suppresses_modules_and_flags_deps() {
    let files = [
        ("Blueprints", "foo_module { name: \"foo\", deps: [\"foo_dir1\"] }\n"),
        (
            "dir1/Blueprints",
            "foo_module { name: \"foo_dir1\", deps: [\"foo_ignored\"] }\n",
        ),
        ("ignored/Blueprints", "foo_module { name: \"foo_ignored\" }\n"),
    ];
    let mut ctx = test_context(&files);
    ctx.add_source_root_dirs(["-ignored"]);
    let (_, errs) =
        ctx.parse_file_list(".", &["Blueprints", "dir1/Blueprints", "ignored/Blueprints"]);
    assert!(errs.is_empty(), "unexpected parse errors: {errs:?}");
    let errs = ctx.resolve_dependencies(None);
    assert_eq!(errs.len(), 1, "expected one error, got {errs:?}");
    let message = errs[0].to_string();
    assert!(
        message.contains("depends on skipped module \"foo_ignored\""),
        "unexpected message: {message}"
    );
    assert!(message.contains("\"ignored/Blueprints\""));
    assert!(message.contains("descendant of \"ignored\""));
    assert!(ctx.module_by_name("foo_ignored").is_none());
    assert!(ctx.module_by_name("foo_dir1").is_some());
}

/// Denying the root while allowing a subtree keeps only the subtree.
#[test]
fn source_root_allowlist_keeps_only_allowed_subtrees() {
    let files = [
        ("Blueprints", "foo_module { name: \"foo\" }\n"),
        ("dir1/Blueprints", "foo_module { name: \"foo_dir1\" }\n"),
    ];
    let mut ctx = test_context(&files);
    ctx.add_source_root_dirs(["-", "dir1"]);
    let (_, errs) = ctx.parse_file_list(".", &["Blueprints", "dir1/Blueprints"]);
    assert!(errs.is_empty());
    let errs = ctx.resolve_dependencies(None);
    assert!(errs.is_empty(), "unexpected errors: {errs:?}");
    assert!(ctx.module_by_name("foo").is_none());
    assert!(ctx.module_by_name("foo_dir1").is_some());
}
