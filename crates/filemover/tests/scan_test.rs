mod common;

use common::{glob_rule, scan_hits, TreeFixture};
use filemover_lib::{PatternSpec, Rule, ScanOptions, Warning};

#[test]
fn scan_finds_nested_matches_across_roots() {
    let fx = TreeFixture::new();
    fx.mkdir("root_a/report_2023");
    fx.mkdir("root_a/deep/report_2024");
    fx.mkdir("root_b/report_old");
    fx.mkdir("root_b/untouched");
    let dest = fx.path("archive");

    let hits = scan_hits(
        vec![glob_rule("reports", "report*", &dest, "{name}")],
        ScanOptions::default(),
        &[fx.path("root_a"), fx.path("root_b")],
    );

    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"report_2023"));
    assert!(names.contains(&"report_2024"));
    assert!(names.contains(&"report_old"));
    for hit in &hits {
        assert_eq!(hit.matched_rule.as_deref(), Some("reports"));
        assert!(hit.dest_preview.is_some());
        // The raw path is stored; no extended-length prefix leaks out.
        assert!(!hit.path.to_string_lossy().contains("\\\\?\\"));
    }
}

#[test]
fn scan_normalizes_full_width_names() {
    let fx = TreeFixture::new();
    fx.mkdir("ｒｅｐｏｒｔ");
    let dest = fx.path("archive");

    let hits = scan_hits(
        vec![glob_rule("reports", "report*", &dest, "{name}")],
        ScanOptions::default(),
        &[fx.root().to_path_buf()],
    );

    assert_eq!(hits.len(), 1);
    // Display name keeps the original text; only matching normalized.
    assert_eq!(hits[0].name, "ｒｅｐｏｒｔ");
}

#[test]
fn scan_respects_exclusion_rules() {
    let fx = TreeFixture::new();
    fx.mkdir("report_keep");
    fx.mkdir("report_temp");
    let dest = fx.path("archive");

    let rules = vec![
        Rule::new(
            "no-temp",
            PatternSpec::contains("temp").exclude(),
            dest.clone(),
            "",
        ),
        glob_rule("reports", "report*", &dest, "{name}"),
    ];
    let hits = scan_hits(
        rules,
        ScanOptions::default(),
        &[fx.root().to_path_buf()],
    );

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "report_keep");
}

#[test]
fn scan_honors_excluded_path_prefixes() {
    let fx = TreeFixture::new();
    fx.mkdir("keep/report_a");
    fx.mkdir("skip/report_b");
    let dest = fx.path("archive");

    let options = ScanOptions {
        excluded_paths: vec![fx.path("skip")],
        ..ScanOptions::default()
    };
    let hits = scan_hits(
        vec![glob_rule("reports", "report*", &dest, "{name}")],
        options,
        &[fx.root().to_path_buf()],
    );

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "report_a");
}

#[test]
fn scan_max_depth_stops_descent() {
    let fx = TreeFixture::new();
    fx.mkdir("report_top");
    fx.mkdir("l1/report_mid");
    fx.mkdir("l1/l2/report_deep");
    let dest = fx.path("archive");

    let options = ScanOptions {
        max_depth: Some(2),
        ..ScanOptions::default()
    };
    let hits = scan_hits(
        vec![glob_rule("reports", "report*", &dest, "{name}")],
        options,
        &[fx.root().to_path_buf()],
    );

    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    assert!(names.contains(&"report_top"));
    assert!(names.contains(&"report_mid"));
    assert!(!names.contains(&"report_deep"));
}

#[test]
fn priority_decides_between_competing_rules() {
    let fx = TreeFixture::new();
    fx.mkdir("report_2024");
    let dest = fx.path("archive");

    let rules = vec![
        glob_rule("catch-all", "*", &dest, "misc/{name}").with_priority(100),
        glob_rule("reports", "report*", &dest, "reports/{name}").with_priority(1),
    ];
    let hits = scan_hits(
        rules,
        ScanOptions::default(),
        &[fx.root().to_path_buf()],
    );

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].matched_rule.as_deref(), Some("reports"));
}

#[test]
fn hits_serialize_to_json_and_back() {
    let fx = TreeFixture::new();
    fx.mkdir("report_x");
    let dest = fx.path("archive");

    let hits = scan_hits(
        vec![glob_rule("reports", "report*", &dest, "{name}")],
        ScanOptions::default(),
        &[fx.root().to_path_buf()],
    );

    let json = serde_json::to_string(&hits).unwrap();
    let parsed: Vec<filemover_lib::FolderHit> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, hits);
}

#[cfg(unix)]
#[test]
fn junction_hits_carry_warning_and_are_not_descended() {
    let fx = TreeFixture::new();
    fx.mkdir("real_report/report_inner");
    std::os::unix::fs::symlink(fx.path("real_report"), fx.path("report_link")).unwrap();
    let dest = fx.path("archive");

    let hits = scan_hits(
        vec![glob_rule("reports", "report*", &dest, "{name}")],
        ScanOptions::default(),
        &[fx.root().to_path_buf()],
    );

    let link = hits.iter().find(|h| h.name == "report_link").unwrap();
    assert!(link.warnings.contains(&Warning::Junction));
    // Inner folder is reachable through the real parent only.
    assert_eq!(hits.iter().filter(|h| h.name == "report_inner").count(), 1);
}
