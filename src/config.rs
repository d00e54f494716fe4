//! Runtime configuration.
//!
//! Layered lowest to highest: built-in defaults, an optional `flogo.toml`
//! in the target directory, `FLOGO_*` environment variables, CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_BIND: &str = ":10000";
pub const DEFAULT_UPSTREAM: &str = "http://localhost:9001";
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// A program plus its arguments, the shape build commands are configured in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn from_argv(argv: &[String]) -> Result<Self, ConfigError> {
        let (program, args) = argv.split_first().ok_or(ConfigError::EmptyBuildCommand)?;
        Ok(CommandSpec {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Which UI fronts the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiKind {
    /// Full-screen terminal UI.
    Tcell,
    /// One line per state change on stdout.
    Flat,
}

impl UiKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "tcell" => Ok(UiKind::Tcell),
            "flat" => Ok(UiKind::Flat),
            other => Err(ConfigError::UnknownUi(other.to_string())),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    bind: Option<String>,
    #[serde(default)]
    upstream: Option<String>,
    #[serde(default)]
    ui: Option<String>,
    #[serde(default)]
    debounce_ms: Option<u64>,
    #[serde(default)]
    build_command: Option<Vec<String>>,
    #[serde(default)]
    source_extension: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Project root being supervised.
    pub target: PathBuf,
    /// HTTP listen address, normalized to host:port.
    pub bind: String,
    /// Where the proxy forwards non-flogo traffic.
    pub upstream: Url,
    pub ui: UiKind,
    pub debounce: Duration,
    pub build_command: CommandSpec,
    /// File suffix the watcher reacts to.
    pub source_extension: String,
}

impl Config {
    /// Assemble the configuration for `target`. `stdout_is_tty` drives the
    /// UI default: full-screen only when someone is looking at a terminal.
    pub fn load(target: &Path, stdout_is_tty: bool) -> Result<Self, ConfigError> {
        let target = expand_target(target);
        if !target.is_dir() {
            return Err(ConfigError::BadTarget(target));
        }

        let raw = read_config_file(&target.join("flogo.toml"))?;

        let bind = env_nonempty("FLOGO_BIND")
            .or(raw.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let upstream = env_nonempty("FLOGO_UPSTREAM")
            .or(raw.upstream)
            .unwrap_or_else(|| DEFAULT_UPSTREAM.to_string());
        let upstream = Url::parse(&upstream).map_err(|source| ConfigError::UpstreamParse {
            value: upstream,
            source,
        })?;

        let ui = match env_nonempty("FLOGO_UI").or(raw.ui) {
            Some(value) => UiKind::parse(&value)?,
            None if stdout_is_tty => UiKind::Tcell,
            None => UiKind::Flat,
        };

        let debounce = Duration::from_millis(raw.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS));

        let build_command = match raw.build_command {
            Some(argv) => CommandSpec::from_argv(&argv)?,
            None => CommandSpec {
                program: "go".into(),
                args: vec!["build".into(), ".".into()],
            },
        };

        Ok(Config {
            target,
            bind: normalize_bind(&bind),
            upstream,
            ui,
            debounce,
            build_command,
            source_extension: raw.source_extension.unwrap_or_else(|| "go".into()),
        })
    }
}

fn read_config_file(path: &Path) -> Result<RawConfig, ConfigError> {
    if !path.exists() {
        return Ok(RawConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    toml::from_str(&text).map_err(|e| ConfigError::ParseFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// `:10000` is accepted as shorthand for all interfaces.
fn normalize_bind(bind: &str) -> String {
    if let Some(port) = bind.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        bind.to_string()
    }
}

fn expand_target(target: &Path) -> PathBuf {
    if let Some(text) = target.to_str()
        && let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    target.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_spec_from_argv() {
        let spec =
            CommandSpec::from_argv(&["go".into(), "build".into(), ".".into()]).expect("parse");
        assert_eq!(spec.program, "go");
        assert_eq!(spec.args, vec!["build".to_string(), ".".to_string()]);
        assert_eq!(spec.display(), "go build .");
    }

    #[test]
    fn command_spec_rejects_empty() {
        assert!(matches!(
            CommandSpec::from_argv(&[]),
            Err(ConfigError::EmptyBuildCommand)
        ));
    }

    #[test]
    fn ui_kind_parse() {
        assert_eq!(UiKind::parse("tcell").unwrap(), UiKind::Tcell);
        assert_eq!(UiKind::parse("flat").unwrap(), UiKind::Flat);
        assert!(matches!(
            UiKind::parse("curses"),
            Err(ConfigError::UnknownUi(_))
        ));
    }

    #[test]
    fn bind_shorthand_is_normalized() {
        assert_eq!(normalize_bind(":10000"), "0.0.0.0:10000");
        assert_eq!(normalize_bind("127.0.0.1:8000"), "127.0.0.1:8000");
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("flogo.toml"),
            r#"
bind = "127.0.0.1:7777"
upstream = "http://localhost:3000"
ui = "flat"
debounce_ms = 150
build_command = ["make", "server"]
source_extension = "rs"
"#,
        )
        .expect("write config");

        let cfg = Config::load(dir.path(), true).expect("load");
        assert_eq!(cfg.bind, "127.0.0.1:7777");
        assert_eq!(cfg.upstream.as_str(), "http://localhost:3000/");
        assert_eq!(cfg.ui, UiKind::Flat);
        assert_eq!(cfg.debounce, Duration::from_millis(150));
        assert_eq!(cfg.build_command.program, "make");
        assert_eq!(cfg.source_extension, "rs");
    }

    #[test]
    fn defaults_when_no_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load(dir.path(), false).expect("load");
        assert_eq!(cfg.bind, "0.0.0.0:10000");
        assert_eq!(cfg.upstream.as_str(), "http://localhost:9001/");
        // No TTY: fall back to the flat UI.
        assert_eq!(cfg.ui, UiKind::Flat);
        assert_eq!(cfg.debounce, Duration::from_millis(300));
        assert_eq!(cfg.build_command.display(), "go build .");
        assert_eq!(cfg.source_extension, "go");
    }

    #[test]
    fn missing_target_is_rejected() {
        let err = Config::load(Path::new("/definitely/not/here"), true).unwrap_err();
        assert!(matches!(err, ConfigError::BadTarget(_)));
    }

    #[test]
    fn bad_toml_is_reported_with_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("flogo.toml"), "bind = [not toml").expect("write");
        let err = Config::load(dir.path(), true).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }
}
