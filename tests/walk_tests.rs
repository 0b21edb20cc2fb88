//! Dependency-walk ordering over graphs built from blueprint files.

mod common;

use common::{parse_and_resolve, test_context, walk_dependency_graph};

/// ```text
/// |---B===D       --- represents a followed edge
/// A               === represents an edge into a non-walkable module
/// |---C---E===G
///     |       |   A is the root and is never visited. The subtrees of
///     |---F---|   B and E are not walked.
/// ```
#[test]
fn walk_skips_unwalkable_subtrees() {
    let mut ctx = test_context(&[(
        "Blueprints",
        r#"
        foo_module {
            name: "A",
            deps: ["B", "C"],
        }

        bar_module {
            name: "B",
            deps: ["D"],
        }

        foo_module {
            name: "C",
            deps: ["E", "F"],
        }

        foo_module {
            name: "D",
        }

        bar_module {
            name: "E",
            deps: ["G"],
        }

        foo_module {
            name: "F",
            deps: ["G"],
        }

        foo_module {
            name: "G",
        }
        "#,
    )]);
    parse_and_resolve(&mut ctx, "Blueprints");

    let top = ctx.module_by_name("A").expect("module A");
    let (down, up) = walk_dependency_graph(&ctx, top, false);
    assert_eq!(down, "BCEFG");
    assert_eq!(up, "BEGFC");
}

/// With duplicates allowed, G is visited through every edge that reaches it
/// but its subtree (H) is expanded only once.
#[test]
fn walk_with_duplicates_revisits_modules_once_per_edge() {
    let mut ctx = test_context(&[(
        "Blueprints",
        r#"
        foo_module {
            name: "A",
            deps: ["B", "C"],
        }

        bar_module {
            name: "B",
            deps: ["D"],
        }

        foo_module {
            name: "C",
            deps: ["E", "F"],
        }

        foo_module {
            name: "D",
        }

        foo_module {
            name: "E",
            deps: ["G"],
        }

        foo_module {
            name: "F",
            deps: ["G", "G"],
        }

        foo_module {
            name: "G",
            deps: ["H"],
        }

        foo_module {
            name: "H",
        }
        "#,
    )]);
    parse_and_resolve(&mut ctx, "Blueprints");

    let top = ctx.module_by_name("A").expect("module A");
    let (down, up) = walk_dependency_graph(&ctx, top, true);
    assert_eq!(down, "BCEGHFGG");
    assert_eq!(up, "BHGEGGFC");
}

/// A module first reached through an ignored edge must still have its
/// subtree expanded when a followed edge reaches it later.
#[test]
fn walk_expands_after_ignored_first_path() {
    let mut ctx = test_context(&[(
        "Blueprints",
        r#"
        foo_module {
            name: "A",
            deps: ["B"],
        }

        foo_module {
            name: "B",
            deps: ["C"],
            ignored_deps: ["D"],
        }

        foo_module {
            name: "C",
            deps: ["D"],
        }

        foo_module {
            name: "D",
            deps: ["E"],
        }

        foo_module {
            name: "E",
        }
        "#,
    )]);
    parse_and_resolve(&mut ctx, "Blueprints");

    let top = ctx.module_by_name("A").expect("module A");
    let (down, up) = walk_dependency_graph(&ctx, top, true);
    assert_eq!(down, "BDCDE");
    assert_eq!(up, "DEDCB");
}

/// Dependencies added by the deps mutator resolve in declaration order.
#[test]
fn direct_deps_resolve_in_declaration_order() {
    let mut ctx = test_context(&[(
        "Blueprints",
        r#"
        foo_module {
            name: "A",
            deps: ["B", "C"],
        }

        foo_module {
            name: "B",
            deps: ["C"],
        }

        foo_module {
            name: "C",
        }
        "#,
    )]);
    parse_and_resolve(&mut ctx, "Blueprints");

    let a = ctx.module_by_name("A").expect("A");
    let b = ctx.module_by_name("B").expect("B");
    let c = ctx.module_by_name("C").expect("C");

    let deps_of = |id| {
        let mut deps = Vec::new();
        ctx.visit_direct_deps(id, |dep| deps.push(dep.id));
        deps
    };
    assert_eq!(deps_of(a), vec![b, c]);
    assert_eq!(deps_of(b), vec![c]);
    assert_eq!(deps_of(c), vec![]);
}
