//! Which shell interprets commands that need shell syntax.
//!
//! On Unix that is `$SHELL` when it names an existing file, otherwise
//! `/bin/sh`. On Windows it is `%ComSpec%`. A `[shell]` config table
//! overrides both.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[cfg(not(windows))]
const FALLBACK_SHELL: &str = "/bin/sh";
#[cfg(windows)]
const FALLBACK_SHELL: &str = r"C:\Windows\System32\cmd.exe";

/// `[shell]` config table.
///
/// ```toml
/// [shell]
/// binary = "/bin/bash"
/// args = ["-c"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ShellConfig {
    pub binary: Option<String>,
    /// Placed before the command text. Inferred from `binary` when absent.
    pub args: Option<Vec<String>>,
}

/// Shell binary plus the flags that make it run one command string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedShell {
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// File name of `binary`, for logs.
    pub name: String,
}

impl DetectedShell {
    fn new(binary: PathBuf, args: Option<Vec<String>>) -> Self {
        let args = args.unwrap_or_else(|| Dialect::of(&binary).command_flags());
        let name = binary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| binary.display().to_string());
        Self { binary, args, name }
    }
}

impl std::fmt::Display for DetectedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.binary.display(), self.args.join(" "))
    }
}

/// How a shell is told to run a command string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Posix,
    Cmd,
    PowerShell,
}

impl Dialect {
    fn of(binary: &Path) -> Self {
        let stem = binary
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match stem.as_str() {
            "cmd" => Self::Cmd,
            "pwsh" | "powershell" => Self::PowerShell,
            _ => Self::Posix,
        }
    }

    fn command_flags(self) -> Vec<String> {
        let flags: &[&str] = match self {
            Self::Posix => &["-c"],
            Self::Cmd => &["/C"],
            Self::PowerShell => &["-NoProfile", "-Command"],
        };
        flags.iter().map(ToString::to_string).collect()
    }
}

/// The override in `config` when it names a binary, else the platform shell.
#[must_use]
pub fn detect_shell(config: Option<&ShellConfig>) -> DetectedShell {
    if let Some(config) = config
        && let Some(binary) = config.binary.as_deref().map(str::trim).filter(|b| !b.is_empty())
    {
        return DetectedShell::new(PathBuf::from(binary), config.args.clone());
    }

    #[cfg(windows)]
    let preferred = std::env::var_os("ComSpec");
    #[cfg(not(windows))]
    let preferred = std::env::var_os("SHELL");
    platform_shell(preferred)
}

/// `preferred` when it names an existing file, else [`FALLBACK_SHELL`].
fn platform_shell(preferred: Option<OsString>) -> DetectedShell {
    let binary = preferred
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_SHELL));
    DetectedShell::new(binary, None)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{Dialect, FALLBACK_SHELL, ShellConfig, detect_shell, platform_shell};

    #[test]
    fn dialect_from_file_stem() {
        assert_eq!(Dialect::of(Path::new("/bin/bash")), Dialect::Posix);
        assert_eq!(Dialect::of(Path::new("fish")), Dialect::Posix);
        assert_eq!(Dialect::of(Path::new(r"C:\Windows\System32\CMD.EXE")), Dialect::Cmd);
        assert_eq!(Dialect::of(Path::new("pwsh")), Dialect::PowerShell);
        assert_eq!(Dialect::of(Path::new("powershell.exe")), Dialect::PowerShell);
    }

    #[test]
    fn override_keeps_explicit_args() {
        let config = ShellConfig {
            binary: Some("/usr/local/bin/fish".to_string()),
            args: Some(vec!["-l".to_string(), "-c".to_string()]),
        };
        let shell = detect_shell(Some(&config));
        assert_eq!(shell.binary, PathBuf::from("/usr/local/bin/fish"));
        assert_eq!(shell.args, vec!["-l", "-c"]);
        assert_eq!(shell.name, "fish");
    }

    #[test]
    fn override_infers_args_from_dialect() {
        let config = ShellConfig {
            binary: Some("pwsh".to_string()),
            args: None,
        };
        assert_eq!(
            detect_shell(Some(&config)).args,
            vec!["-NoProfile", "-Command"]
        );
    }

    #[test]
    fn blank_override_is_ignored() {
        let config = ShellConfig {
            binary: Some("  ".to_string()),
            args: None,
        };
        assert_eq!(detect_shell(Some(&config)), detect_shell(None));
    }

    #[test]
    fn missing_or_unusable_preference_falls_back() {
        for preferred in [None, Some(""), Some("/definitely/not/a/shell")] {
            let shell = platform_shell(preferred.map(Into::into));
            assert_eq!(shell.binary, PathBuf::from(FALLBACK_SHELL));
        }
    }

    #[cfg(unix)]
    #[test]
    fn existing_preference_is_used() {
        let shell = platform_shell(Some("/bin/sh".into()));
        assert_eq!(shell.binary, PathBuf::from("/bin/sh"));
        assert_eq!(shell.args, vec!["-c"]);
        assert_eq!(shell.name, "sh");
    }

    #[test]
    fn display_shows_invocation_prefix() {
        let config = ShellConfig {
            binary: Some("/bin/bash".to_string()),
            args: None,
        };
        assert_eq!(detect_shell(Some(&config)).to_string(), "/bin/bash -c");
    }
}
