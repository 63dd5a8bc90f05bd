mod common;

use common::{glob_rule, scan_hits, TreeFixture};
use filemover_lib::session::{build_plan, undo_journal, validate_journal};
use filemover_lib::{
    CancelToken, ExecOptions, ExecStatus, Executor, MovePlan, PlanOptions, ProgressTracker,
    ScanOptions, UndoEngine,
};
use std::path::Path;

fn execute(plan: &MovePlan, journal: &Path) -> filemover_lib::ExecResult {
    let executor = Executor::new(ExecOptions {
        parallel_threads: Some(2),
    });
    let tracker = ProgressTracker::new(plan.executable_nodes().count() as u64, None);
    executor
        .run(plan, journal, &CancelToken::new(), &tracker)
        .unwrap()
}

#[test]
fn undo_restores_top_level_names() {
    let fx = TreeFixture::new();
    fx.mkdir("src/report_a");
    fx.write_file("src/report_a/one.txt", b"1");
    fx.mkdir("src/report_b");
    fx.mkdir("src/untouched");
    let dest = fx.path("out");

    let names_before = fx.top_level_names("src");

    let rules = vec![glob_rule("r", "report*", &dest, "{name}")];
    let hits = scan_hits(rules.clone(), ScanOptions::default(), &[fx.path("src")]);
    let plan = build_plan(&hits, &rules, PlanOptions::default()).unwrap();

    let journal = fx.path("run.jsonl");
    let result = execute(&plan, &journal);
    assert_eq!(result.status, ExecStatus::Ok);
    assert_ne!(fx.top_level_names("src"), names_before);

    let report = undo_journal(&journal, false).unwrap();
    assert_eq!(report.restored_count, result.success_count);
    assert!(report.failed_restores.is_empty());

    // The set of top-level names under the source root is exactly its
    // pre-execution value.
    assert_eq!(fx.top_level_names("src"), names_before);
    assert!(fx.path("src/report_a/one.txt").exists());
}

#[test]
fn execute_undo_execute_reaches_same_state() {
    let fx = TreeFixture::new();
    fx.mkdir("src/report_x");
    fx.write_file("src/report_x/data.txt", b"stable");
    let dest = fx.path("out");

    let rules = vec![glob_rule("r", "report*", &dest, "{name}")];
    let hits = scan_hits(rules.clone(), ScanOptions::default(), &[fx.path("src")]);
    let plan = build_plan(&hits, &rules, PlanOptions::default()).unwrap();

    let first_journal = fx.path("first.jsonl");
    execute(&plan, &first_journal);
    let after_first = fx.top_level_names("out");

    undo_journal(&first_journal, false).unwrap();
    assert!(fx.path("src/report_x").exists());

    let second_journal = fx.path("second.jsonl");
    let result = execute(&plan, &second_journal);
    assert_eq!(result.status, ExecStatus::Ok);
    assert_eq!(fx.top_level_names("out"), after_first);
    assert_eq!(
        std::fs::read(fx.path("out/report_x/data.txt")).unwrap(),
        b"stable"
    );
}

#[test]
fn undo_reverses_operations_in_reverse_order() {
    let fx = TreeFixture::new();
    fx.mkdir("src/report_parent/report_child");
    let dest = fx.path("out");

    let rules = vec![glob_rule("r", "report*", &dest, "{parent}_{name}")];
    let hits = scan_hits(rules.clone(), ScanOptions::default(), &[fx.path("src")]);
    let plan = build_plan(&hits, &rules, PlanOptions::default()).unwrap();

    let journal = fx.path("run.jsonl");
    let result = execute(&plan, &journal);
    assert_eq!(result.status, ExecStatus::Ok);
    assert_eq!(result.success_count, 2);

    let report = undo_journal(&journal, false).unwrap();
    assert_eq!(report.restored_count, 2);
    assert!(fx.path("src/report_parent/report_child").exists());
}

#[test]
fn validate_journal_summarizes_run() {
    let fx = TreeFixture::new();
    fx.mkdir("src/report_a");
    let dest = fx.path("out");

    let rules = vec![glob_rule("r", "report*", &dest, "{name}")];
    let hits = scan_hits(rules.clone(), ScanOptions::default(), &[fx.path("src")]);
    let plan = build_plan(&hits, &rules, PlanOptions::default()).unwrap();

    let journal = fx.path("run.jsonl");
    execute(&plan, &journal);

    let summary = validate_journal(&journal).unwrap();
    assert_eq!(summary.ok, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.pending_tail, 0);
}

#[test]
fn undo_skips_missing_destination_but_restores_the_rest() {
    let fx = TreeFixture::new();
    fx.mkdir("src/report_a");
    fx.mkdir("src/report_b");
    let dest = fx.path("out");

    let rules = vec![glob_rule("r", "report*", &dest, "{name}")];
    let hits = scan_hits(rules.clone(), ScanOptions::default(), &[fx.path("src")]);
    let plan = build_plan(&hits, &rules, PlanOptions::default()).unwrap();

    let journal = fx.path("run.jsonl");
    execute(&plan, &journal);

    // Someone deleted one destination before the undo ran.
    std::fs::remove_dir_all(dest.join("report_a")).unwrap();

    let report = UndoEngine::new(false).replay(&journal).unwrap();
    assert_eq!(report.restored_count, 1);
    assert_eq!(report.failed_restores.len(), 1);
    assert!(fx.path("src/report_b").exists());
    assert!(!fx.path("src/report_a").exists());
}
