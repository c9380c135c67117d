use std::process::Command;

/// stdout of a successful git invocation
fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8(out.stdout).ok()?;
    Some(text.trim().to_owned()).filter(|s| !s.is_empty())
}

fn main() {
    // Abbreviated commit, "-dirty" when the worktree has edits
    let version = git(&["describe", "--always", "--dirty", "--abbrev=8"])
        .unwrap_or_else(|| String::from("unknown"));
    println!("cargo:rustc-env=GIT_HASH={version}");

    for path in [".git/HEAD", ".git/index"] {
        println!("cargo:rerun-if-changed={path}");
    }
}
