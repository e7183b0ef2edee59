use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

const SCRUBBED_ENV: &[&str] = &[
    "ARM_CLIENT_ID",
    "ARM_CLIENT_SECRET",
    "ARM_TENANT_ID",
    "ARM_SUBSCRIPTION_ID",
    "WQA_CONFIG",
    "WQA_WORKER_ID",
    "WQA_GET_WEKA_IO_TOKEN",
    "WQA_LOG_FILE",
    "WQA_LOG_FORMAT",
    "WQA_PREFIX",
    "WQA_TEMPLATE_PATH",
    "WQA_CLOUD",
    "WQA_POLL_INTERVAL",
];

/// `wqa` with a clean environment and its working root under `work_root`.
pub fn wqa_command(work_root: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wqa"));
    for var in SCRUBBED_ENV {
        cmd.env_remove(var);
    }
    cmd.env("WQA_WORK_ROOT", work_root);
    cmd.env("WQA_LOG_LEVEL", "warn");
    cmd
}

/// Shell script standing in for terraform. Every invocation appends its
/// arguments and the subscription it saw to a log outside the working
/// directory, so the log survives cleanup.
pub struct FakeTerraform {
    dir: TempDir,
    script: PathBuf,
    log: PathBuf,
}

impl FakeTerraform {
    pub fn new(apply_exit: i32) -> Self {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("terraform");
        let log = dir.path().join("calls.log");
        let body = format!(
            r#"#!/bin/sh
echo "$* sub=$ARM_SUBSCRIPTION_ID" >> '{log}'
case "$1" in
  init)
    echo "Terraform has been successfully initialized!"
    ;;
  apply)
    if [ {apply_exit} -ne 0 ]; then
      echo "Error: creating Linux Virtual Machine Scale Set: quota exceeded" >&2
      exit {apply_exit}
    fi
    echo "Apply complete! Resources: 42 added, 0 changed, 0 destroyed."
    echo 'SSH-KEY-PATH = "/tmp/weka-key.pem"'
    ;;
  destroy)
    echo "Destroy complete! Resources: 42 destroyed."
    ;;
esac
"#,
            log = log.display(),
        );
        std::fs::write(&script, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        Self { dir, script, log }
    }

    pub fn binary(&self) -> String {
        self.script.display().to_string()
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}
