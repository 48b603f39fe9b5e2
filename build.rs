use std::process::Command;

fn main() {
    // Bindings are generated from the protocol description at compile time
    println!("cargo:rerun-if-changed=protocol/zigen.xml");

    let built = chrono::Utc::now().format("%Y-%m-%d").to_string();
    println!("cargo:rustc-env=ZSURFACE_BUILD_DATE={}", built);

    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=ZSURFACE_GIT_COMMIT={}", commit);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
