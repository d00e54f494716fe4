//! Build-artifact resolution.
//!
//! `go build .` drops its output next to the sources, named after the
//! module directory. To know what to run (and what to refuse to run, see
//! the recursion guard) we ask the toolchain for the package name: `main`
//! means the artifact is `abs(target)/basename(abs(target))`; anything
//! else is a library and unsupported.

use std::io;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::ResolveError;

pub struct Resolver {
    tool: PathBuf,
}

impl Resolver {
    /// Locate the `go` tool on PATH.
    pub fn from_path() -> Result<Self, ResolveError> {
        Ok(Resolver {
            tool: which::which("go")?,
        })
    }

    /// Use a specific tool binary. Tests substitute a fake here.
    pub fn with_tool(tool: impl Into<PathBuf>) -> Self {
        Resolver { tool: tool.into() }
    }

    /// The absolute path of the executable the build step produces.
    pub async fn build_output_abs(&self, target: &Path) -> Result<PathBuf, ResolveError> {
        let abs = std::path::absolute(target).map_err(|source| ResolveError::Absolute {
            path: target.to_path_buf(),
            source,
        })?;
        if !abs.join("go.mod").is_file() {
            return Err(ResolveError::MissingManifest(abs));
        }

        let args = ["list", "-f", "{{.Name}}"];
        let command = format!("{} {}", self.tool.display(), args.join(" "));
        let output = Command::new(&self.tool)
            .args(args)
            .current_dir(&abs)
            .output()
            .await
            .map_err(|err| ResolveError::ListFailed {
                command: command.clone(),
                reason: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(ResolveError::ListFailed {
                command,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if name != "main" {
            return Err(ResolveError::UnsupportedPackage(name));
        }

        // `go build` names the executable after the directory.
        let base = abs
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| ResolveError::Absolute {
                path: abs.clone(),
                source: io::Error::other("target has no basename"),
            })?;
        Ok(abs.join(base))
    }
}

/// The recursion guard: true when the artifact is this supervisor itself.
pub fn is_self(artifact: &Path, own_name: &str) -> bool {
    artifact.file_name().and_then(|name| name.to_str()) == Some(own_name)
}

/// The name the running supervisor goes by, for the recursion guard.
pub fn own_binary_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "flogo".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_tool(dir: &Path, package_name: &str) -> PathBuf {
        let path = dir.join("go");
        std::fs::write(&path, format!("#!/bin/sh\necho {package_name}\n")).expect("write tool");
        let mut perms = std::fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[tokio::test]
    async fn main_package_resolves_to_dir_basename() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("go.mod"), "module example.com/demo\n").expect("go.mod");
        let tool = fake_tool(dir.path(), "main");

        let resolver = Resolver::with_tool(tool);
        let artifact = resolver
            .build_output_abs(dir.path())
            .await
            .expect("resolve");

        let base = dir.path().file_name().unwrap();
        assert_eq!(artifact, dir.path().join(base));
        assert!(artifact.is_absolute());
    }

    #[tokio::test]
    async fn library_package_is_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("go.mod"), "module example.com/lib\n").expect("go.mod");
        let tool = fake_tool(dir.path(), "mylib");

        let err = Resolver::with_tool(tool)
            .build_output_abs(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedPackage(name) if name == "mylib"));
    }

    #[tokio::test]
    async fn missing_manifest_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = fake_tool(dir.path(), "main");

        let err = Resolver::with_tool(tool)
            .build_output_abs(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingManifest(_)));
    }

    #[test]
    fn recursion_guard_compares_basenames() {
        assert!(is_self(Path::new("/proj/flogo"), "flogo"));
        assert!(!is_self(Path::new("/proj/webapp"), "flogo"));
        assert!(!is_self(Path::new("/proj/flogo-demo"), "flogo"));
    }
}
