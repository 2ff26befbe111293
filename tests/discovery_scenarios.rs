// Discovery semantics: depth limits, inclusive size boundaries, file-count
// ceilings, and force-include interaction with blanket ignores.

use std::fs;
use std::path::Path;

use dirsnap::core::CancelToken;
use dirsnap::core::profile::Profile;
use dirsnap::{WalkStrategy, Walker};
use tempfile::TempDir;

fn walk(base: &Path, profile: &Profile) -> Vec<String> {
    Walker::new(base, profile)
        .expect("walker")
        .walk(WalkStrategy::Sequential, &CancelToken::new())
        .expect("walk")
        .into_iter()
        .map(|fd| fd.rel_path.to_string())
        .collect()
}

#[test]
fn max_depth_zero_yields_root_files_only() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("a/b")).unwrap();
    fs::write(tmp.path().join("root.txt"), "r").unwrap();
    fs::write(tmp.path().join("a/one.txt"), "1").unwrap();
    fs::write(tmp.path().join("a/b/two.txt"), "2").unwrap();

    let mut profile = Profile::default();
    profile.options.max_depth = Some(0);
    assert_eq!(walk(tmp.path(), &profile), vec!["root.txt"]);

    // A limit at or past the deepest level yields everything.
    profile.options.max_depth = Some(10);
    assert_eq!(
        walk(tmp.path(), &profile),
        vec!["a/b/two.txt", "a/one.txt", "root.txt"]
    );
}

#[test]
fn size_boundaries_are_inclusive() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("below.txt"), "x".repeat(59)).unwrap();
    fs::write(tmp.path().join("exact.txt"), "x".repeat(60)).unwrap();
    fs::write(tmp.path().join("above.txt"), "x".repeat(61)).unwrap();

    let mut profile = Profile::default();
    profile.options.min_file_size = Some(60);
    assert_eq!(
        walk(tmp.path(), &profile),
        vec!["above.txt", "exact.txt"]
    );

    profile.options.min_file_size = None;
    profile.options.max_file_size = Some(60);
    assert_eq!(
        walk(tmp.path(), &profile),
        vec!["below.txt", "exact.txt"]
    );
}

#[test]
fn min_size_keeps_only_the_large_files() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.js"), "x".repeat(50)).unwrap();
    fs::write(tmp.path().join("b.js"), "x".repeat(100)).unwrap();
    fs::write(tmp.path().join("large.txt"), "x".repeat(10_000)).unwrap();

    let mut profile = Profile::default();
    profile.options.min_file_size = Some(60);
    assert_eq!(walk(tmp.path(), &profile), vec!["b.js", "large.txt"]);
}

#[test]
fn file_count_ceiling_applies_over_sorted_candidates() {
    let tmp = TempDir::new().unwrap();
    for name in ["c.txt", "a.txt", "b.txt"] {
        fs::write(tmp.path().join(name), "x").unwrap();
    }
    let mut profile = Profile::default();
    profile.options.max_file_count = Some(2);
    assert_eq!(walk(tmp.path(), &profile), vec!["a.txt", "b.txt"]);
}

#[test]
fn keep_file_overrides_a_blanket_ignore() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join(".claude/commands")).unwrap();
    fs::write(tmp.path().join(".claude/settings.json"), "{}").unwrap();
    fs::write(tmp.path().join(".claude/commands/review.md"), "review").unwrap();
    fs::write(tmp.path().join("main.rs"), "fn main() {}").unwrap();
    fs::write(tmp.path().join(".snapignore"), "**/*\n").unwrap();
    fs::write(tmp.path().join(".snapkeep"), ".claude\n").unwrap();

    let paths = walk(tmp.path(), &Profile::default());
    assert_eq!(
        paths,
        vec![".claude/commands/review.md", ".claude/settings.json"]
    );
}

#[test]
fn hidden_files_are_skipped_unless_enabled() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".hidden.txt"), "h").unwrap();
    fs::write(tmp.path().join("visible.txt"), "v").unwrap();

    assert_eq!(walk(tmp.path(), &Profile::default()), vec!["visible.txt"]);

    let mut profile = Profile::default();
    profile.options.include_hidden = true;
    assert_eq!(
        walk(tmp.path(), &profile),
        vec![".hidden.txt", "visible.txt"]
    );
}

#[test]
fn total_size_ceiling_stops_the_sorted_stream() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.txt"), "x".repeat(40)).unwrap();
    fs::write(tmp.path().join("b.txt"), "x".repeat(40)).unwrap();
    fs::write(tmp.path().join("c.txt"), "x".repeat(40)).unwrap();

    let mut profile = Profile::default();
    profile.options.max_total_size = Some(80);
    assert_eq!(walk(tmp.path(), &profile), vec!["a.txt", "b.txt"]);
}
