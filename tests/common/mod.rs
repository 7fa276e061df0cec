//! Shared helpers for the CLI behaviour tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

/// Scratch directory for one CLI invocation.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        Utf8Path::from_path(self.dir.path()).expect("utf-8 tempdir")
    }

    pub fn file(&self, name: &str) -> Utf8PathBuf {
        self.path().join(name)
    }

    /// Writes an executable shell script and returns its path.
    pub fn script(&self, name: &str, body: &str) -> Utf8PathBuf {
        let path = self.file(name);
        fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    /// Builds a `ferry` command isolated from any user configuration and
    /// pointed at `pool_url`.
    pub fn ferry(&self, pool_url: &str) -> Command {
        let mut cmd = cargo_bin_cmd!("ferry");
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.path())
            .env_remove("FERRY_CONFIG_PATH")
            .env_remove("RUST_LOG")
            .env("FERRY_POOL_API_URL", pool_url)
            .env("FERRY_POOL_API_KEY", "secret");
        cmd
    }
}
