//! Build identity for `/health` and the startup banner
//!
//! `GIT_HASH` is the short commit, suffixed `-dirty` when the working tree
//! has uncommitted changes. Source drops without a `.git` directory can pin
//! it through `GLUCOTAG_BUILD_HASH`. `BUILD_TIMESTAMP` is RFC 3339 UTC and
//! `BUILD_PROFILE` is cargo's profile name.

use std::path::Path;
use std::process::Command;

const HASH_OVERRIDE: &str = "GLUCOTAG_BUILD_HASH";

/// Trimmed stdout of a successful git invocation
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn commit_id() -> String {
    if let Some(pinned) = std::env::var(HASH_OVERRIDE).ok().filter(|s| !s.is_empty()) {
        return pinned;
    }
    let Some(hash) = git(&["rev-parse", "--short=8", "HEAD"]).filter(|s| !s.is_empty()) else {
        return "unknown".to_string();
    };
    match git(&["status", "--porcelain", "--untracked-files=no"]) {
        Some(changes) if !changes.is_empty() => format!("{}-dirty", hash),
        _ => hash,
    }
}

fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", commit_id());
    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );
    println!(
        "cargo:rustc-env=BUILD_PROFILE={}",
        std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string())
    );

    // Re-run when the commit or the staged tree moves, not on every build
    println!("cargo:rerun-if-env-changed={}", HASH_OVERRIDE);
    println!("cargo:rerun-if-changed=build.rs");
    for marker in ["../.git/HEAD", "../.git/index"] {
        if Path::new(marker).exists() {
            println!("cargo:rerun-if-changed={}", marker);
        }
    }
}
