use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// Single target with --dry-run should print the dry-run message and exit 0.
#[test]
fn test_single_target_dry_run() {
    cargo_bin_cmd!("webscanner")
        .args(&["http://example.com", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] Would scan target: http://example.com"));
}

/// List file with --dry-run should process every line and print dry-run for each.
#[test]
fn test_list_file_dry_run() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "http://target1.com").unwrap();
    writeln!(file, "# skipped").unwrap();
    writeln!(file, "http://target2.com").unwrap();
    writeln!(file, "http://target3.com").unwrap();

    let path = file.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("webscanner")
        .args(&["-l", &path, "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[+] Loaded 3 target(s)"))
        .stdout(predicate::str::contains("[DRY RUN] Would scan target: http://target1.com"))
        .stdout(predicate::str::contains("[DRY RUN] Would scan target: http://target2.com"))
        .stdout(predicate::str::contains("[DRY RUN] Would scan target: http://target3.com"));
}

/// Running with no arguments should fail (clap requires target or -l).
#[test]
fn test_no_args_shows_error() {
    cargo_bin_cmd!("webscanner")
        .assert()
        .failure();
}

#[test]
fn test_max_pages_out_of_range_fails() {
    cargo_bin_cmd!("webscanner")
        .args(&["http://example.com", "--max-pages", "51", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_pages"));
}

#[test]
fn test_disallowed_sqlmap_arg_fails() {
    cargo_bin_cmd!("webscanner")
        .args(&["http://example.com", "--sqlmap-arg=--os-shell", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sqlmap arg not allowed"));
}

#[test]
fn test_config_file_supplies_target() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"target": "http://configured.test", "maxPages": 5}}"#).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    cargo_bin_cmd!("webscanner")
        .args(&["--config", &path, "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] Would scan target: http://configured.test"));
}

#[test]
fn test_env_override_is_validated() {
    cargo_bin_cmd!("webscanner")
        .env("WEBSCANNER_MAX_PAGES", "many")
        .args(&["http://example.com", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("WEBSCANNER_MAX_PAGES"));
}
