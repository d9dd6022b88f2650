//! Host architecture names as used by the orchestration layer.

/// Maps a Rust target architecture to the orchestration layer's name.
#[must_use]
pub fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Architecture of the running host.
#[must_use]
pub fn host_arch() -> &'static str {
    normalize_arch(std::env::consts::ARCH)
}
