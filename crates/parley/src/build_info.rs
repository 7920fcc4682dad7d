use serde::Serialize;

// ============================================================================
// Constants
// ============================================================================

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = match option_env!("BUILD_COMMIT") {
    Some(c) => c,
    None => "unknown",
};

/// Get the version string including the commit.
pub fn version_string() -> String {
    format!("{} (commit: {})", VERSION, COMMIT)
}

// ============================================================================
// BuildInfo
// ============================================================================

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
}

impl BuildInfo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: VERSION,
            commit: COMMIT,
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_info_reports_package() {
        let info = BuildInfo::new();
        assert_eq!(info.name, "parley");
        assert_eq!(info.version, VERSION);
        assert!(!info.commit.is_empty());
    }

    #[test]
    fn version_string_mentions_commit() {
        let vs = version_string();
        assert!(vs.starts_with(VERSION));
        assert!(vs.contains("commit:"));
    }
}
