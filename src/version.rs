//! Version information.

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name from Cargo.toml.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Git commit SHA, when the build environment provides `HUGINN_GIT_SHA`.
pub const GIT_SHA: Option<&str> = option_env!("HUGINN_GIT_SHA");

/// Full version string: `{version}` or `{version}+{sha}`.
///
/// Examples:
/// - `0.1.0`
/// - `0.1.0+abc1234`
pub fn version_string() -> String {
    match GIT_SHA {
        Some(sha) => format_version(sha),
        None => PKG_VERSION.to_string(),
    }
}

fn format_version(sha: &str) -> String {
    let short: String = sha.chars().take(7).collect();
    format!("{PKG_VERSION}+{short}")
}
