//! Deterministic, sanitized derivation of per-user filesystem paths.
//!
//! Pure functions only: no I/O happens here. Every path that later touches
//! disk is expected to have been produced by [`TenantPaths::derive`].

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{GatewayError, Result};

const MAX_USER_ID_LEN: usize = 128;

/// Absolute, sanitized paths for a single tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantPaths {
    pub user_id: String,
    pub config_path: Utf8PathBuf,
    pub workspace_path: Utf8PathBuf,
    pub agent_dir: Utf8PathBuf,
    pub sessions_path: Utf8PathBuf,
    pub memory_path: Utf8PathBuf,
}

impl TenantPaths {
    /// Derive all per-user paths from the configured roots and a raw,
    /// untrusted user id.
    pub fn derive(
        config_root: &Utf8Path,
        workspace_root: &Utf8Path,
        raw_user_id: &str,
    ) -> Result<Self> {
        let user_id = sanitize_user_id(raw_user_id)?;

        let config_path = config_root
            .join("users")
            .join(&user_id)
            .join("config.json");
        let workspace_path = workspace_root.join("users").join(&user_id);
        let agent_dir = workspace_path.join("agent");
        let sessions_path = workspace_path.join("sessions");
        let memory_path = workspace_path.join("memory");

        Ok(Self {
            user_id,
            config_path,
            workspace_path,
            agent_dir,
            sessions_path,
            memory_path,
        })
    }
}

/// Reduce a raw, possibly hostile user id to `[A-Za-z0-9_-]`, mapping path
/// separators and `..` segments to `_`. Rejects empty results and anything
/// over [`MAX_USER_ID_LEN`] characters (checked on the *sanitized* output,
/// so an attacker can't pad around the limit with characters that get
/// dropped).
pub fn sanitize_user_id(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(GatewayError::invalid_user_id("empty user id"));
    }

    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        return Err(GatewayError::invalid_user_id(
            "user id sanitizes to an empty string",
        ));
    }
    if sanitized.len() > MAX_USER_ID_LEN {
        return Err(GatewayError::invalid_user_id(format!(
            "user id exceeds {MAX_USER_ID_LEN} characters"
        )));
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("../../etc/passwd", "______etc_passwd")]
    #[case("a/b\\c", "a_b_c")]
    #[case("user-123_abc", "user-123_abc")]
    #[case("weird/../chars", "weird____chars")]
    fn sanitizes_to_expected(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_user_id(raw).unwrap(), expected);
    }

    #[test]
    fn rejects_empty_input() {
        assert!(sanitize_user_id("").is_err());
    }

    #[rstest]
    #[case("///", "___")]
    #[case("....", "____")]
    fn separator_only_input_maps_to_underscores_not_an_error(
        #[case] raw: &str,
        #[case] expected: &str,
    ) {
        // Every disallowed char maps 1:1 to `_` rather than being dropped, so
        // a raw id made entirely of separators still sanitizes to a
        // non-empty, if uninformative, id.
        assert_eq!(sanitize_user_id(raw).unwrap(), expected);
    }

    #[test]
    fn rejects_overlong_ids() {
        let long = "a".repeat(129);
        assert!(sanitize_user_id(&long).is_err());
        let ok = "a".repeat(128);
        assert!(sanitize_user_id(&ok).is_ok());
    }

    #[test]
    fn derived_paths_never_escape_workspace_root() {
        let config_root = Utf8Path::new("/etc/gateway/config");
        let workspace_root = Utf8Path::new("/var/lib/gateway/workspaces");
        for raw in ["../../../etc", "..", "normal-user", "weird/../chars"] {
            let paths = TenantPaths::derive(config_root, workspace_root, raw).unwrap();
            let expected_prefix = workspace_root.join("users");
            assert!(paths.workspace_path.starts_with(&expected_prefix));
            assert!(paths.agent_dir.starts_with(&paths.workspace_path));
            assert!(paths.sessions_path.starts_with(&paths.workspace_path));
            assert!(paths.memory_path.starts_with(&paths.workspace_path));
        }
    }
}
