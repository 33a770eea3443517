// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");

    // Packagers can pin the version
    let version = if let Ok(v) = std::env::var("FULLHOUSE_VERSION") {
        v
    } else {
        git_version().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// "0.1.0-abcdef1" at a tag, "0.1.0-dirty-abcdef1" after it, bare hash
/// without tags
fn git_version() -> Option<String> {
    let describe = run_git(&["describe", "--tags", "--always", "--match", "v*"])?;
    let describe = describe.strip_prefix('v').unwrap_or(&describe).to_string();

    let parts: Vec<&str> = describe.rsplitn(3, '-').collect();
    if parts.len() == 3 {
        let hash = parts[0].strip_prefix('g').unwrap_or(parts[0]);
        return Some(format!("{}-dirty-{}", parts[2], hash));
    }

    match run_git(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) if hash != describe => Some(format!("{}-{}", describe, hash)),
        _ => Some(describe),
    }
}

fn run_git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
