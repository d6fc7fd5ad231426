mod support;

use predicates::str::contains;

#[test]
fn weekboard_help_works() {
    support::weekboard_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Weekly schedule board"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = ["task", "week", "placement", "sync", "reconcile", "watch"];

    for cmd in subcommands {
        support::weekboard_cmd()
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn empty_board_lists_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let board = support::TestBoard::new()?;

    board
        .cmd()
        .args(["task", "list"])
        .assert()
        .success()
        .stdout(contains("Tasks (0)"));

    let weeks = board.json(&["week", "list"])?;
    assert_eq!(weeks.as_array().map(Vec::len), Some(0));
    Ok(())
}
