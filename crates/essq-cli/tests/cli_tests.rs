use assert_cmd::Command;
use essq_core::model::{ExecutionKind, JobType};
use essq_test_utils::harness::TestContext;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

fn essq(ctx: &TestContext, config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("essq").unwrap();
    cmd.env("XDG_CACHE_HOME", &ctx.data_dir)
        .env("XDG_CONFIG_HOME", &ctx.config_dir)
        .env_remove("ESSQ_LOG_LEVEL")
        .arg("--config")
        .arg(config);
    cmd
}

fn install_probe(ctx: &mut TestContext) {
    let script = ctx.test_root.join("probe.sh");
    fs::write(&script, "#!/bin/sh\necho '{\"status\": \"done\"}'\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    ctx.settings.probe_command = Some(script.to_string_lossy().into_owned());
}

fn find_record(ctx: &TestContext, label: &str) -> PathBuf {
    let dir = ctx.project_dir.join("calcs").join("Species").join(label);
    fs::read_dir(&dir)
        .unwrap()
        .map(|entry| entry.unwrap().path().join("job.json"))
        .find(|path| path.exists())
        .unwrap_or_else(|| panic!("no job record under {}", dir.display()))
}

fn submit_incore(ctx: &TestContext, config: &Path) -> PathBuf {
    let mut spec = ctx.job_spec("gaussian", vec![JobType::Sp], "H2O");
    spec.execution = ExecutionKind::Incore;
    let spec_path = ctx.write_job_spec(&spec, "job.toml");
    essq(ctx, config)
        .arg("submit")
        .arg(&spec_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ran incore"));
    find_record(ctx, "H2O")
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("essq")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("troubleshoot"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn test_completions_are_generated() {
    Command::cargo_bin("essq")
        .unwrap()
        .args(["completions", "--shell", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("essq"));
}

#[test]
fn test_plan_reports_job_type_batching() {
    let ctx = TestContext::new();
    let config = ctx.write_config();
    let spec = ctx.job_spec("gaussian", vec![JobType::Opt, JobType::Freq, JobType::Sp], "H2O");
    let spec_path = ctx.write_job_spec(&spec, "job.toml");

    essq(&ctx, &config)
        .arg("plan")
        .arg(&spec_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("job types"))
        .stdout(predicate::str::contains("H2O: 3 work item(s)"));
}

#[test]
fn test_plan_rejects_unknown_fields() {
    let ctx = TestContext::new();
    let config = ctx.write_config();
    let spec_path = ctx.test_root.join("bad.toml");
    fs::write(&spec_path, "backend = \"gaussian\"\nflavour = \"spicy\"\n").unwrap();

    essq(&ctx, &config)
        .arg("plan")
        .arg(&spec_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("[ERROR]"));
}

#[test]
fn test_submit_rejects_unknown_backend() {
    let ctx = TestContext::new();
    let config = ctx.write_config();
    let spec = ctx.job_spec("turbomole", vec![JobType::Sp], "H2O");
    let spec_path = ctx.write_job_spec(&spec, "job.toml");

    essq(&ctx, &config)
        .arg("submit")
        .arg(&spec_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown backend 'turbomole'"));
}

#[test]
fn test_submit_then_poll_incore_job() {
    let mut ctx = TestContext::new();
    install_probe(&mut ctx);
    let config = ctx.write_config();
    let record = submit_incore(&ctx, &config);
    assert!(record.with_file_name("output.out").exists());

    essq(&ctx, &config)
        .args(["poll", "--interval", "0"])
        .arg(&record)
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"))
        .stdout(predicate::str::contains("All jobs finished."));

    essq(&ctx, &config)
        .args(["list", "--completed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("H2O"))
        .stdout(predicate::str::contains("done"));
}

#[test]
fn test_poll_without_probe_is_unresolved() {
    let ctx = TestContext::new();
    let config = ctx.write_config();
    let record = submit_incore(&ctx, &config);

    essq(&ctx, &config)
        .args(["poll", "--interval", "0"])
        .arg(&record)
        .assert()
        .failure()
        .stdout(predicate::str::contains("unresolved"))
        .stderr(predicate::str::contains("1 of 1 job(s) did not succeed"));
}

#[test]
fn test_list_shows_initiated_jobs() {
    let ctx = TestContext::new();
    let config = ctx.write_config();

    essq(&ctx, &config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No jobs found"));

    submit_incore(&ctx, &config);
    essq(&ctx, &config)
        .args(["list", "--project", "test_project"])
        .assert()
        .success()
        .stdout(predicate::str::contains("H2O"))
        .stdout(predicate::str::contains("wb97xd/def2-tzvp"));
}

#[test]
fn test_troubleshoot_prints_json() {
    let ctx = TestContext::new();
    let config = ctx.write_config();
    let record = submit_incore(&ctx, &config);

    let output = essq(&ctx, &config)
        .arg("troubleshoot")
        .arg(&record)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert!(json.get("outcome").is_some());
}

#[test]
fn test_delete_without_scheduler_id() {
    let ctx = TestContext::new();
    let config = ctx.write_config();
    let record = submit_incore(&ctx, &config);

    essq(&ctx, &config)
        .arg("delete")
        .arg(&record)
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted"));
}
