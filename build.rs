use std::process::Command;

fn main() {
    // Respect an explicitly provided commit (CI builds from tarballs).
    if std::env::var("GIT_COMMIT").is_ok() {
        println!("cargo:rerun-if-env-changed=GIT_COMMIT");
        return;
    }

    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Some(commit) = commit {
        println!("cargo:rustc-env=GIT_COMMIT={commit}");
    }

    println!("cargo:rerun-if-env-changed=GIT_COMMIT");
    println!("cargo:rerun-if-changed=build.rs");
}
