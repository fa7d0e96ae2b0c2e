use assert_cmd::cargo::cargo_bin_cmd;

fn help_output(extra_env: &[(&str, &str)]) -> String {
    let mut cmd = cargo_bin_cmd!("virtualenv");
    cmd.arg("--help");
    for (key, value) in extra_env {
        cmd.env(key, value);
    }
    let assert = cmd.assert().success();
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 help")
}

#[test]
fn help_lists_core_options() {
    let output = help_output(&[("VIRTUALENV_CONFIG_FILE", "/nonexistent/virtualenv.ini")]);
    for option in [
        "--python",
        "--clear",
        "--system-site-packages",
        "--copies",
        "--seeder",
        "--no-seed",
        "--extra-search-dir",
        "--app-data",
        "--no-periodic-update",
    ] {
        assert!(output.contains(option), "help missing {option}: {output}");
    }
    assert!(
        output.contains("virtualenv -p python3.12 --no-setuptools venv"),
        "help missing example: {output}"
    );
}

#[test]
fn help_epilog_reports_config_file_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("virtualenv.ini");
    let output = help_output(&[("VIRTUALENV_CONFIG_FILE", missing.to_str().expect("utf8 path"))]);
    assert!(
        output.contains("missing (changed via env var VIRTUALENV_CONFIG_FILE)"),
        "epilog missing: {output}"
    );

    std::fs::write(&missing, "[virtualenv]\nclear = true\n").expect("write ini");
    let output = help_output(&[("VIRTUALENV_CONFIG_FILE", missing.to_str().expect("utf8 path"))]);
    assert!(output.contains("active (changed via env var VIRTUALENV_CONFIG_FILE)"), "epilog: {output}");
}

#[test]
fn version_flag_prints_version() {
    let assert = cargo_bin_cmd!("virtualenv").arg("--version").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "version output: {stdout}");
}
