#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

pub struct TestBoard {
    dir: TempDir,
}

impl TestBoard {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(".weekboard.toml");
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Command bound to this board.
    pub fn cmd(&self) -> Command {
        let mut cmd = weekboard_cmd();
        cmd.arg("--root").arg(self.path());
        cmd
    }

    /// Run a command with `--json` and return the `data` field of the envelope.
    pub fn json(&self, args: &[&str]) -> Result<Value, Box<dyn std::error::Error>> {
        let output = self.cmd().args(args).arg("--json").output()?;
        if !output.status.success() {
            return Err(format!(
                "{args:?} failed: {}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
            .into());
        }
        let envelope: Value = serde_json::from_slice(&output.stdout)?;
        Ok(envelope["data"].clone())
    }

    pub fn read_document(&self, collection: &str, id: &str) -> Result<Value, Box<dyn std::error::Error>> {
        let raw = fs::read_to_string(self.data_dir().join(collection).join(format!("{id}.json")))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

pub fn weekboard_cmd() -> Command {
    let mut cmd = Command::cargo_bin("weekboard").expect("binary");
    cmd.env_remove("WEEKBOARD_ROOT")
        .env_remove("WEEKBOARD_ACTOR")
        .env_remove("RUST_LOG");
    cmd
}
