use assert_cmd::Command;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

fn node() -> Command {
    let mut cmd = Command::cargo_bin("reward-node").expect("binary");
    cmd.env_remove("REWARD_NODE_CONFIG").env("RUST_LOG", "warn");
    cmd
}

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let db = dir.join("db");
    let cfg = format!(
        "[storage]\ndb_dir = \"{}\"\n\n[logging]\nformat = \"text\"\n\n{extra}",
        db.display()
    );
    let path = dir.join("reward.toml");
    std::fs::write(&path, cfg).expect("write config");
    path
}

fn stdout_json(out: std::process::Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("json stdout")
}

#[test]
fn calc_uses_default_reward_parameters() {
    let out = node().args(["calc", "--held", "50"]).output().expect("run");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "60");

    let out = node()
        .args(["calc", "--held", "0", "--total", "7"])
        .output()
        .expect("run");
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "1");
}

#[test]
fn invalid_config_exits_with_status_2() {
    let dir = tempfile::tempdir().expect("tmp");
    let cfg = write_config(dir.path(), "[reward]\namount_held = 0\n");
    node()
        .arg("--config")
        .arg(&cfg)
        .args(["calc", "--held", "1"])
        .assert()
        .code(2);
}

#[test]
fn wallet_register_then_show_latest() {
    let dir = tempfile::tempdir().expect("tmp");
    let cfg = write_config(dir.path(), "");

    for address in ["0xOLD", "0xNEW"] {
        node()
            .arg("--config")
            .arg(&cfg)
            .args(["wallet", "register", "--identity", "alice", "--address", address])
            .assert()
            .success();
    }

    let out = node()
        .arg("--config")
        .arg(&cfg)
        .args(["wallet", "show", "--identity", "alice"])
        .output()
        .expect("run");
    let v = stdout_json(out);
    assert_eq!(v["current"], "0xNEW");
    assert_eq!(v["history"].as_array().map(Vec::len), Some(2));
}

#[test]
fn cycle_opens_pending_round_from_snapshot() {
    let dir = tempfile::tempdir().expect("tmp");
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs();
    let snapshot = dir.path().join("activity.json");
    std::fs::write(
        &snapshot,
        serde_json::json!({
            "posts": [
                {"id": "p1", "author_id": "42", "author_name": "alice", "created_at": now - 60, "likes": 3},
                {"id": "p2", "author_id": "43", "author_name": "bob", "created_at": now - 30, "likes": 1}
            ]
        })
        .to_string(),
    )
    .expect("write snapshot");
    let cfg = write_config(
        dir.path(),
        &format!(
            "[engagement]\nkind = \"posts\"\nsnapshot_path = \"{}\"\n",
            snapshot.display()
        ),
    );

    let out = node()
        .arg("--config")
        .arg(&cfg)
        .arg("cycle")
        .output()
        .expect("run");
    let v = stdout_json(out);
    assert_eq!(v["outcome"], "winner");
    assert_eq!(v["candidate"], "42");
    assert_eq!(v["state"], "pending");

    let out = node()
        .arg("--config")
        .arg(&cfg)
        .args(["rounds", "pending"])
        .output()
        .expect("run");
    let rounds = stdout_json(out);
    assert_eq!(rounds.as_array().map(Vec::len), Some(1));
    assert_eq!(rounds[0]["subject"], "42");
    assert_eq!(rounds[0]["post_ref"], "p1");
}
