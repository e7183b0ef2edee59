use tempfile::TempDir;

use crate::common::{assert_contains, assert_not_contains, init_test_logging, wqa_command};

/// Value of `key` in a rendered `key = value` block.
fn rendered_value(main_tf: &str, key: &str) -> Option<String> {
    main_tf.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().to_string())
    })
}

#[test]
fn test_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_help_includes_description");

    let root = TempDir::new().unwrap();
    let output = wqa_command(root.path())
        .arg("--help")
        .output()
        .expect("Failed to run wqa --help");

    assert!(output.status.success(), "wqa --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "Weka-on-Azure deployment QA harness");
    for command in ["render", "deploy", "status", "scenario", "destroy"] {
        assert_contains(&stdout, command);
    }
    crate::test_log!("TEST PASS: test_help_includes_description");
}

#[test]
fn test_render_applies_overrides_and_identity() {
    init_test_logging();
    crate::test_log!("TEST START: test_render_applies_overrides_and_identity");

    let root = TempDir::new().unwrap();
    let output = wqa_command(root.path())
        .args(["render", "--worker-id", "gw7", "--set", "cluster_size=10", "--set", "hotspare=2"])
        .output()
        .expect("Failed to run wqa render");

    assert!(output.status.success(), "render failed: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "module \"deploy_weka\"");
    assert_eq!(rendered_value(&stdout, "cluster_size").as_deref(), Some("10"));
    assert_eq!(rendered_value(&stdout, "hotspare").as_deref(), Some("2"));
    assert_eq!(rendered_value(&stdout, "protection_level").as_deref(), Some("2"));
    assert_eq!(rendered_value(&stdout, "prefix").as_deref(), Some("\"weka\""));
    let rg = rendered_value(&stdout, "rg_name").unwrap();
    assert!(rg.starts_with("\"wqa-gw7-") && rg.ends_with("-rg\""), "unexpected rg_name {rg}");
    assert_not_contains(&stdout, "%PARAMETERS%");

    // nothing is written by render
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    crate::test_log!("TEST PASS: test_render_applies_overrides_and_identity");
}

#[test]
fn test_render_never_prints_download_token() {
    init_test_logging();
    let root = TempDir::new().unwrap();
    let output = wqa_command(root.path())
        .env("WQA_GET_WEKA_IO_TOKEN", "tok-very-secret")
        .arg("render")
        .output()
        .expect("Failed to run wqa render");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_not_contains(&stdout, "tok-very-secret");
    assert_eq!(rendered_value(&stdout, "get_weka_io_token").as_deref(), Some("\"***\""));
}

#[test]
fn test_malformed_override_exits_with_error() {
    init_test_logging();
    let root = TempDir::new().unwrap();
    let output = wqa_command(root.path())
        .args(["render", "--set", "no-equals-sign"])
        .output()
        .expect("Failed to run wqa render");

    assert_eq!(output.status.code(), Some(1));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "key=value");
}

#[test]
fn test_destroy_without_credentials_fails_before_touching_anything() {
    init_test_logging();
    crate::test_log!("TEST START: test_destroy_without_credentials_fails_before_touching_anything");

    let root = TempDir::new().unwrap();
    let workdir = root.path().join("gw0-abc");
    std::fs::create_dir_all(&workdir).unwrap();
    let output = wqa_command(root.path())
        .args(["destroy", "--resource-group", "wqa-gw0-abc-rg", "--workdir"])
        .arg(&workdir)
        .output()
        .expect("Failed to run wqa destroy");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "missing cloud credentials");
    assert_contains(&stderr, "client_secret");
    assert!(workdir.exists(), "working directory must survive a failed connect");
    crate::test_log!("TEST PASS: test_destroy_without_credentials_fails_before_touching_anything");
}

#[test]
fn test_unknown_scenario_is_a_usage_error() {
    let root = TempDir::new().unwrap();
    let output = wqa_command(root.path())
        .args(["scenario", "chaos-monkey"])
        .output()
        .expect("Failed to run wqa scenario");

    assert!(!output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "chaos-monkey");
}
