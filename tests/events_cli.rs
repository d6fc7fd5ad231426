mod support;

use std::fs;
use std::io::{BufRead, BufReader};
use std::process::Stdio;
use std::sync::mpsc;
use std::time::Duration;

use serde_json::Value;

use support::TestBoard;

fn parse_lines(raw: &str) -> Result<Vec<Value>, serde_json::Error> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

#[test]
fn events_file_records_mutations() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let events = board.path().join("events.jsonl");
    let events_arg = events.display().to_string();

    board
        .cmd()
        .args(["--events", &events_arg, "week", "create", "2024-01-01"])
        .assert()
        .success();
    board
        .cmd()
        .args([
            "--events", &events_arg, "--actor", "ana", "task", "add", "Limpeza", "--status",
            "scheduled", "-a", "Ana", "--start", "2024-01-02", "--end", "2024-01-02",
        ])
        .assert()
        .success();

    let lines = parse_lines(&fs::read_to_string(&events)?)?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["schema_version"], "weekboard.event.v1");
    assert_eq!(lines[0]["event"], "week_created");
    assert_eq!(lines[0]["data"]["id"], "2024-01-01");
    assert_eq!(lines[1]["event"], "task_created");
    assert_eq!(lines[1]["actor"], "ana");
    assert_eq!(lines[1]["data"]["sync"]["placements_added"], 1);
    Ok(())
}

#[test]
fn events_on_stdout_replace_regular_output() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;

    let output = board
        .cmd()
        .args(["--events", "-", "--json", "week", "create", "2024-01-01"])
        .output()?;
    assert!(output.status.success());

    let lines = parse_lines(&String::from_utf8(output.stdout)?)?;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["event"], "week_created");
    Ok(())
}

#[test]
fn watch_emits_current_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    board.json(&["week", "create", "2024-01-01"])?;

    let output = board
        .cmd()
        .args(["watch", "weeks", "--count", "1"])
        .timeout(Duration::from_secs(20))
        .output()?;
    assert!(output.status.success());

    let lines = parse_lines(&String::from_utf8(output.stdout)?)?;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["event"], "weeks_changed");
    assert_eq!(lines[0]["data"]["collection"], "weeks");
    assert_eq!(lines[0]["data"]["size"], 1);
    assert_eq!(lines[0]["data"]["added"], serde_json::json!(["2024-01-01"]));
    Ok(())
}

#[test]
fn watch_follows_other_processes() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;

    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("weekboard"))
        .arg("--root")
        .arg(board.path())
        .args(["watch", "tasks", "--count", "2"])
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .spawn()?;
    let stdout = child.stdout.take().ok_or("stdout")?;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let first = rx.recv_timeout(Duration::from_secs(20));
    let created = first.is_ok().then(|| board.json(&["task", "add", "Limpeza"]));
    let second = rx.recv_timeout(Duration::from_secs(20));
    if second.is_err() {
        let _ = child.kill();
    }
    let _ = child.wait();

    let first: Value = serde_json::from_str(&first?)?;
    assert_eq!(first["data"]["size"], 0);

    let id = created.ok_or("task not created")??["id"].clone();
    let second: Value = serde_json::from_str(&second?)?;
    assert_eq!(second["event"], "tasks_changed");
    assert_eq!(second["data"]["added"], serde_json::json!([id]));
    Ok(())
}
