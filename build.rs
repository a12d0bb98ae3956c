use std::process::Command;

/// Run a git command and return its trimmed stdout, or "unknown".
fn git(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rustc-env=BUILD_COMMIT={}", git(&["rev-parse", "--short", "HEAD"]));
    println!(
        "cargo:rustc-env=BUILD_DATE={}",
        git(&["log", "-1", "--format=%cs"])
    );

    println!("cargo:rerun-if-changed=.git/HEAD");
}
