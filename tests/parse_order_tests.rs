//! Deterministic parse ordering under adversarial parse latency, and
//! multi-file syntax error accumulation.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use blueprint::Context;
use blueprint::fs::{FileSystem, MockFileSystem};
use camino::{Utf8Path, Utf8PathBuf};

/// Filesystem that stalls selected reads, simulating slow parses.
struct SlowFileSystem {
    inner: MockFileSystem,
    delays: HashMap<Utf8PathBuf, Duration>,
}

impl SlowFileSystem {
    fn new(
        files: &[(&str, &str)],
        delays: &[(&str, u64)],
    ) -> Self {
        Self {
            inner: MockFileSystem::new(files.iter().copied()),
            delays: delays
                .iter()
                .map(|&(path, millis)| (Utf8PathBuf::from(path), Duration::from_millis(millis)))
                .collect(),
        }
    }
}

impl FileSystem for SlowFileSystem {
    fn read_file(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        if let Some(delay) = self.delays.get(path) {
            std::thread::sleep(*delay);
        }
        self.inner.read_file(path)
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        self.inner.exists(path)
    }
}

fn visit_order(ctx: &mut Context, seeds: &[&str]) -> (Vec<String>, Vec<String>) {
    let mut order = Vec::new();
    let (_, errs) = ctx.walk_blueprints_files(".", seeds, |file| {
        order.push(file.path.to_string());
    });
    (order, errs.iter().map(ToString::to_string).collect())
}

/// Seed files are visited in seed-list order even when the earliest files
/// take the longest to parse.
#[test]
fn walk_visits_seeds_in_seed_order() {
    let files = [
        ("Blueprints", "sample_module { name: \"a\" }"),
        ("dir1/Blueprints", "sample_module { name: \"b\" }"),
        ("dir1/dir2/Blueprints", "sample_module { name: \"c\" }"),
    ];
    let delays = [("Blueprints", 120), ("dir1/Blueprints", 60)];
    let mut ctx = Context::new();
    ctx.set_file_system(Arc::new(SlowFileSystem::new(&files, &delays)));

    let (order, errs) = visit_order(
        &mut ctx,
        &["Blueprints", "dir1/Blueprints", "dir1/dir2/Blueprints"],
    );
    assert!(errs.is_empty(), "unexpected errors: {errs:?}");
    assert_eq!(
        order,
        vec!["Blueprints", "dir1/Blueprints", "dir1/dir2/Blueprints"]
    );
}

/// Transitively discovered files are visited beneath their parent in lexical
/// order, again independent of parse latency.
#[test]
fn walk_visits_discovered_files_in_lexical_order() {
    let files = [
        ("Blueprints", "subdirs = [\"dir2\", \"dir1\"]"),
        ("dir1/Blueprints", "sample_module { name: \"b\" }"),
        ("dir2/Blueprints", "subdirs = [\"nested\"]"),
        ("dir2/nested/Blueprints", "sample_module { name: \"d\" }"),
    ];
    let delays = [("Blueprints", 60), ("dir1/Blueprints", 120)];
    let mut ctx = Context::new();
    ctx.set_file_system(Arc::new(SlowFileSystem::new(&files, &delays)));

    let (order, errs) = visit_order(&mut ctx, &["Blueprints"]);
    assert!(errs.is_empty(), "unexpected errors: {errs:?}");
    assert_eq!(
        order,
        vec![
            "Blueprints",
            "dir1/Blueprints",
            "dir2/Blueprints",
            "dir2/nested/Blueprints",
        ]
    );
}

/// Syntax errors from multiple files are all reported, in file order, and
/// do not stop other files from being visited.
#[test]
fn walk_accumulates_syntax_errors_across_files() {
    let files = [
        ("Blueprints", "\nsample_module {\n    name: \"a\" \"b\",\n}\n"),
        ("dir1/Blueprints", "sample_module {\n    name: \"b\",\n"),
        ("dir1/dir2/Blueprints", "sample_module {\n    name: \"c\",\n}\n"),
    ];
    let mut ctx = Context::new();
    ctx.mock_file_system(files);

    let (order, errs) = visit_order(
        &mut ctx,
        &["Blueprints", "dir1/Blueprints", "dir1/dir2/Blueprints"],
    );
    assert_eq!(order.len(), 3, "all files visited: {order:?}");
    assert_eq!(
        errs,
        vec![
            "Blueprints:3:15: expected \"}\", found String",
            "dir1/Blueprints:3:1: expected \"}\", found EOF",
        ]
    );
}
