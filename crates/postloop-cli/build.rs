use std::process::Command;

/// `git rev-parse --short HEAD`, or `None` outside a checkout.
fn git_revision() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let rev = String::from_utf8(out.stdout).ok()?;
    Some(rev.trim().to_owned()).filter(|r| !r.is_empty())
}

fn main() {
    let rev = git_revision().unwrap_or_else(|| "unknown".to_owned());
    println!("cargo:rustc-env=POSTLOOP_GIT_SHA={rev}");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
}
