use std::fs;

use tempfile::TempDir;

use crate::common::{assert_contains, assert_not_contains, init_test_logging, wqa_command};

#[test]
fn test_config_file_feeds_render() {
    init_test_logging();
    crate::test_log!("TEST START: test_config_file_feeds_render");

    let root = TempDir::new().unwrap();
    let template = root.path().join("custom.tf");
    fs::write(&template, "module \"qa_weka\" {\n%PARAMETERS%\n}\n").unwrap();
    let config = root.path().join("wqa.toml");
    fs::write(
        &config,
        format!(
            r#"
[deployment]
prefix = "qa"
template_path = "{}"

[deployment.parameters]
cluster_size = 8
instance_type = "Standard_L16s_v3"
"#,
            template.display()
        ),
    )
    .unwrap();

    let output = wqa_command(root.path())
        .env("WQA_CONFIG", &config)
        .args(["render", "--set", "cluster_size=9"])
        .output()
        .expect("Failed to run wqa render");

    assert!(output.status.success(), "render failed: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "module \"qa_weka\"");
    assert_not_contains(&stdout, "deploy_weka");
    assert_contains(&stdout, "\"Standard_L16s_v3\"");
    assert_contains(&stdout, "\"qa\"");
    // per-run override beats the file
    assert!(stdout.lines().any(|l| l.trim_start().starts_with("cluster_size") && l.trim_end().ends_with("= 9")));
    crate::test_log!("TEST PASS: test_config_file_feeds_render");
}

#[test]
fn test_environment_overrides_config_file() {
    init_test_logging();
    let root = TempDir::new().unwrap();
    let config = root.path().join("wqa.toml");
    fs::write(&config, "[deployment]\nprefix = \"from-file\"\n").unwrap();

    let output = wqa_command(root.path())
        .args(["--config"])
        .arg(&config)
        .env("WQA_PREFIX", "from-env")
        .arg("render")
        .output()
        .expect("Failed to run wqa render");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "\"from-env\"");
    assert_not_contains(&stdout, "from-file");
}

#[test]
fn test_malformed_config_file_is_rejected() {
    init_test_logging();
    let root = TempDir::new().unwrap();
    let config = root.path().join("wqa.toml");
    fs::write(&config, "[polling]\ninterval = \"soon\"\n").unwrap();

    let output = wqa_command(root.path())
        .args(["--config"])
        .arg(&config)
        .arg("render")
        .output()
        .expect("Failed to run wqa render");

    assert_eq!(output.status.code(), Some(1));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "invalid config");
}

#[test]
fn test_every_bad_variable_is_reported() {
    init_test_logging();
    let root = TempDir::new().unwrap();
    let output = wqa_command(root.path())
        .env("WQA_POLL_INTERVAL", "often")
        .env("WQA_CLOUD", "gcp")
        .arg("render")
        .output()
        .expect("Failed to run wqa render");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "WQA_POLL_INTERVAL");
    assert_contains(&stderr, "WQA_CLOUD");
}

#[test]
fn test_missing_template_is_reported() {
    init_test_logging();
    let root = TempDir::new().unwrap();
    let output = wqa_command(root.path())
        .env("WQA_TEMPLATE_PATH", root.path().join("nope.tf"))
        .arg("render")
        .output()
        .expect("Failed to run wqa render");

    assert_eq!(output.status.code(), Some(1));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "cannot read template");
}
