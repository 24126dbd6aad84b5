use std::{env, process::Command};

use chrono::{DateTime, Utc};

/// Короткий хэш коммита: `ZCAST_GIT_COMMIT` перекрывает git, вне
/// репозитория получается `unknown`.
fn commit_id() -> String {
    if let Ok(commit) = env::var("ZCAST_GIT_COMMIT") {
        return commit;
    }
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Время сборки; `SOURCE_DATE_EPOCH` делает его воспроизводимым.
fn build_time() -> String {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

fn main() {
    println!("cargo:rerun-if-env-changed=ZCAST_GIT_COMMIT");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=.git/HEAD");

    println!("cargo:rustc-env=GIT_COMMIT={}", commit_id());
    println!("cargo:rustc-env=BUILD_TIME={}", build_time());
}
