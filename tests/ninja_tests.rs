//! End-to-end manifest generation: module actions, singleton actions, phony
//! deduplication, and the fixed emission order.

use blueprint::hasher::fnv64a_hex;
use blueprint::ninja::NinjaTextWriter;
use blueprint::{
    BuildParams, Context, Module, ModuleContext, Singleton, SingletonContext,
};
use indexmap::IndexMap;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CcProperties {
    srcs: Vec<String>,
    order_only: Vec<String>,
}

#[derive(Debug, Clone)]
struct CcModule {
    properties: CcProperties,
}

impl Module for CcModule {
    fn generate_build_actions(&self, ctx: &mut ModuleContext<'_>) {
        let name = ctx.module_name().to_owned();
        let mut params = IndexMap::new();
        params.insert("command".to_owned(), "cc -o $out $in".to_owned());
        ctx.rule(format!("cc_{name}"), params);
        ctx.build(BuildParams {
            rule: format!("cc_{name}"),
            outputs: vec![format!("{name}.o")],
            inputs: self.properties.srcs.clone(),
            order_only: self.properties.order_only.clone(),
            description: Some(format!("compile {name}")),
            ..BuildParams::default()
        });
    }

    fn clone_module(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }
}

/// Aggregates every module output into an `all` phony and owns the
/// manifest-level defaults and includes.
struct AllSingleton;

impl Singleton for AllSingleton {
    fn generate_build_actions(&self, ctx: &mut SingletonContext<'_>) {
        ctx.variable("builddir", "out");
        let mut outputs = Vec::new();
        ctx.visit_all_modules(|id, _module| {
            outputs.push(format!("{}.o", ctx.module_name(id)));
        });
        ctx.build(BuildParams {
            rule: "phony".to_owned(),
            outputs: vec!["all".to_owned()],
            inputs: outputs,
            ..BuildParams::default()
        });
        ctx.add_default_target("all");
        ctx.add_subninja("extra.ninja");
    }
}

fn manifest_context() -> Context {
    let mut ctx = Context::new();
    ctx.mock_file_system([(
        "Blueprints",
        r#"
        cc_module { name: "A", srcs: ["A.c"], order_only: ["a", "b"] }
        cc_module { name: "B", srcs: ["B.c"], order_only: ["b", "a"] }
        cc_module { name: "C", srcs: ["C.c"], order_only: ["a", "c"] }
        cc_module { name: "D", srcs: ["D.c"], order_only: ["a", "c"] }
        "#,
    )]);
    ctx.register_module_type("cc_module", |properties: CcProperties| CcModule {
        properties,
    });
    ctx.register_singleton_type("all", AllSingleton, false);
    ctx
}

fn generate(ctx: &mut Context) -> String {
    let (_, errs) = ctx.parse_blueprints_files("Blueprints");
    assert!(errs.is_empty(), "unexpected parse errors: {errs:?}");
    let errs = ctx.resolve_dependencies(None);
    assert!(errs.is_empty(), "unexpected dep errors: {errs:?}");
    let errs = ctx.prepare_build_actions(None);
    assert!(errs.is_empty(), "unexpected action errors: {errs:?}");
    let mut writer = NinjaTextWriter::new(Vec::new());
    ctx.write_build_file(&mut writer).expect("write manifest");
    String::from_utf8(writer.into_inner()).expect("utf-8 manifest")
}

#[test]
fn manifest_emits_in_fixed_order_with_deduplicated_order_only_deps() {
    let mut ctx = manifest_context();
    let manifest = generate(&mut ctx);

    let h_ab = fnv64a_hex(b"ab");
    let h_ac = fnv64a_hex(b"ac");
    let expected = format!(
        "# generated build manifest - do not edit\n\
         \n\
         builddir = out\n\
         \n\
         rule cc_A\n  command = cc -o $out $in\n\n\
         rule cc_B\n  command = cc -o $out $in\n\n\
         rule cc_C\n  command = cc -o $out $in\n\n\
         rule cc_D\n  command = cc -o $out $in\n\n\
         build A.o: cc_A A.c || dedup-{h_ab}\n  description = compile A\n\n\
         build B.o: cc_B B.c || dedup-{h_ab}\n  description = compile B\n\n\
         build C.o: cc_C C.c || dedup-{h_ac}\n  description = compile C\n\n\
         build D.o: cc_D D.c || dedup-{h_ac}\n  description = compile D\n\n\
         build all: phony A.o B.o C.o D.o\n\n\
         build dedup-{h_ab}: phony a b\n\n\
         build dedup-{h_ac}: phony a c\n\n\
         default all\n\
         subninja extra.ninja\n"
    );
    assert_eq!(manifest, expected);
}

/// Preparing twice must not stack a second round of deduplication on top of
/// the first.
#[test]
fn repeated_preparation_is_idempotent_for_phony_dedup() {
    let mut ctx = manifest_context();
    let first = generate(&mut ctx);

    let errs = ctx.prepare_build_actions(None);
    assert!(errs.is_empty(), "unexpected errors: {errs:?}");
    let mut writer = NinjaTextWriter::new(Vec::new());
    ctx.write_build_file(&mut writer).expect("write manifest");
    let second = String::from_utf8(writer.into_inner()).expect("utf-8 manifest");
    assert_eq!(first, second);
}

/// Module errors reported from `generate_build_actions` halt the phase.
#[test]
fn module_errors_from_build_actions_are_reported() {
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct FailingProperties {}

    #[derive(Debug, Clone)]
    struct FailingModule;

    impl Module for FailingModule {
        fn generate_build_actions(&self, ctx: &mut ModuleContext<'_>) {
            ctx.module_errorf("refusing to build");
        }

        fn clone_module(&self) -> Box<dyn Module> {
            Box::new(self.clone())
        }
    }

    let mut ctx = Context::new();
    ctx.mock_file_system([("Blueprints", "failing_module { name: \"X\" }")]);
    ctx.register_module_type("failing_module", |_properties: FailingProperties| {
        FailingModule
    });
    let (_, errs) = ctx.parse_blueprints_files("Blueprints");
    assert!(errs.is_empty());
    let errs = ctx.resolve_dependencies(None);
    assert!(errs.is_empty());
    let errs = ctx.prepare_build_actions(None);
    assert_eq!(errs.len(), 1);
    assert!(errs[0].to_string().contains("refusing to build"));
    assert!(errs[0].to_string().contains("Blueprints:1:1"));
}
