use assert_cmd::cargo::cargo_bin_cmd;

fn help(args: &[&str]) -> String {
    let mut cmd = cargo_bin_cmd!("shardscanctl");
    let output = cmd
        .args(args)
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8_lossy(&output).into_owned()
}

#[test]
fn top_level_help_lists_commands() {
    let text = help(&[]);
    assert!(text.contains("scan"), "help missing scan");
    assert!(text.contains("offsets"), "help missing offsets");
    assert!(text.contains("--config"), "help missing --config");
}

#[test]
fn scan_help_mentions_run_options() {
    let text = help(&["scan"]);
    for flag in ["--workers", "--shards", "--follow", "--seed", "--summary", "--batch-size"] {
        assert!(text.contains(flag), "scan help missing {flag}");
    }
}

#[test]
fn offsets_set_requires_shard_and_value() {
    let text = help(&["offsets", "set"]);
    assert!(text.contains("--shard"));
    assert!(text.contains("--value"));
}
