//! Layered bootstrap-file resolver: `custom > template > built-in`.
//!
//! A [`WorkspaceResolver`] is a cheap, by-value handle bound to one user's
//! workspace path and the (optional) shared template path. It never holds a
//! reference back to the manager that created it — callers pass it through
//! to agent execution the way the rest of the stack passes connection
//! params by value rather than by handle-back-to-owner.

pub mod defaults;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;

use crate::error::Result;

const CUSTOM_DIR: &str = "custom";
const MEMORY_FILE_EXT: &str = "md";

/// Which layer would serve (or did serve) a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedLayer {
    Custom,
    Template,
    Builtin,
    Missing,
}

#[derive(Debug, Clone)]
pub struct WorkspaceResolver {
    #[allow(dead_code)]
    user_id: String,
    workspace_path: Utf8PathBuf,
    template_path: Option<Utf8PathBuf>,
}

impl WorkspaceResolver {
    pub fn new(
        user_id: impl Into<String>,
        workspace_path: impl Into<Utf8PathBuf>,
        template_path: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            workspace_path: workspace_path.into(),
            template_path,
        }
    }

    fn custom_dir(&self) -> Utf8PathBuf {
        self.workspace_path.join(CUSTOM_DIR)
    }

    /// Reduce a caller-supplied filename to its basename, neutralizing any
    /// directory-traversal attempt (`../../etc/passwd` -> `passwd`).
    fn basename(filename: &str) -> String {
        Utf8Path::new(filename)
            .file_name()
            .unwrap_or("unnamed")
            .to_string()
    }

    /// Which layer would serve `read(filename)`, without actually reading.
    pub async fn resolve(&self, filename: &str) -> ResolvedLayer {
        let name = Self::basename(filename);

        let custom = self.custom_dir().join(&name);
        if tokio::fs::metadata(&custom).await.is_ok() {
            return ResolvedLayer::Custom;
        }

        if let Some(template_path) = &self.template_path {
            let template = template_path.join(&name);
            if tokio::fs::metadata(&template).await.is_ok() {
                return ResolvedLayer::Template;
            }
        }

        if defaults::builtin_content(&name).is_some() {
            return ResolvedLayer::Builtin;
        }

        ResolvedLayer::Missing
    }

    /// Read `filename` through the `custom > template > builtin` chain.
    /// Returns `Ok(None)` only when all three layers miss; any other I/O
    /// fault propagates as [`crate::error::GatewayError::Storage`].
    pub async fn read(&self, filename: &str) -> Result<Option<String>> {
        let name = Self::basename(filename);

        let custom = self.custom_dir().join(&name);
        match tokio::fs::read_to_string(&custom).await {
            Ok(content) => return Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(template_path) = &self.template_path {
            let template = template_path.join(&name);
            match tokio::fs::read_to_string(&template).await {
                Ok(content) => return Ok(Some(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(defaults::builtin_content(&name).map(str::to_owned))
    }

    /// Write `filename` into the custom layer with owner-only permissions,
    /// creating the parent directory (also owner-only) if needed.
    pub async fn write(&self, filename: &str, content: &str) -> Result<()> {
        let name = Self::basename(filename);
        let dir = self.custom_dir();
        create_private_dir_all(&dir).await?;

        let path = dir.join(&name);
        tokio::fs::write(&path, content).await?;
        set_private_file_mode(&path).await?;
        Ok(())
    }

    fn today_memory_path(&self) -> Utf8PathBuf {
        let today = Local::now().format("%Y-%m-%d").to_string();
        self.workspace_path
            .join("memory")
            .join(format!("{today}.{MEMORY_FILE_EXT}"))
    }

    pub async fn read_today_memory(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.today_memory_path()).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_today_memory(&self, content: &str) -> Result<()> {
        let path = self.today_memory_path();
        if let Some(parent) = path.parent() {
            create_private_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        set_private_file_mode(&path).await?;
        Ok(())
    }

    /// List the (base) filenames in `workspace_path/{subdir}`, or an empty
    /// vec if the directory does not exist — a missing directory is not an
    /// error here, a miss is.
    pub async fn list_files(&self, subdir: Option<&str>) -> Result<Vec<String>> {
        let dir = match subdir {
            Some(s) => self.workspace_path.join(s),
            None => self.workspace_path.clone(),
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Bootstrap filenames (the union of what's in the custom layer, the
    /// template layer, and the builtin set) alongside which layer would
    /// currently serve each one — a thin wrapper over [`Self::resolve`] for
    /// UIs that want to show "default vs. customized" without a read/write
    /// round trip per file.
    pub async fn list_bootstrap_files_with_provenance(&self) -> Result<Vec<(String, ResolvedLayer)>> {
        let mut names: std::collections::BTreeSet<String> =
            defaults::BUILTIN_FILENAMES.iter().map(|s| s.to_string()).collect();
        names.extend(self.list_files(Some(CUSTOM_DIR)).await?);
        if let Some(template_path) = &self.template_path {
            match tokio::fs::read_dir(template_path).await {
                Ok(mut entries) => {
                    while let Some(entry) = entries.next_entry().await? {
                        if let Some(name) = entry.file_name().to_str() {
                            names.insert(name.to_owned());
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut result = Vec::with_capacity(names.len());
        for name in names {
            let layer = self.resolve(&name).await;
            result.push((name, layer));
        }
        Ok(result)
    }
}

/// Create a directory tree with owner-only (`0700`) permissions on every
/// component this call creates.
pub async fn create_private_dir_all(path: &Utf8Path) -> Result<()> {
    tokio::fs::create_dir_all(path).await?;
    set_private_dir_mode(path).await?;
    Ok(())
}

#[cfg(unix)]
async fn set_private_dir_mode(path: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_private_dir_mode(_path: &Utf8Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn set_private_file_mode(path: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_private_file_mode(_path: &Utf8Path) -> Result<()> {
    Ok(())
}
