//! Build metadata accessors.
//! Includes the generated version.rs from the build script so the binary and
//! the server share a single source of truth.

include!(concat!(env!("OUT_DIR"), "/version.rs"));

/// Crate version as recorded in Cargo.toml
pub fn package_version() -> &'static str {
    PACKAGE_VERSION
}

/// Build time string from the build script (UTC)
pub fn build_time() -> &'static str {
    BUILD_TIME
}

/// Short git hash captured by the build script
pub fn git_hash() -> &'static str {
    GIT_HASH
}

/// One-line version banner used by `--version` and the startup log
pub fn long_version() -> String {
    format!(
        "{} (built {}, commit {})",
        package_version(),
        build_time(),
        git_hash()
    )
}
