fn main() {
    // Surfaced by `GET /health`
    println!(
        "cargo:rustc-env=FLEETD_BUILD_TIMESTAMP={}",
        chrono::Utc::now().to_rfc3339()
    );

    if let Ok(output) = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    {
        if output.status.success() {
            let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
            println!("cargo:rustc-env=FLEETD_GIT_HASH={hash}");
        }
    }
    println!("cargo:rerun-if-changed=build.rs");
}
