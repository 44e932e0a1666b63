//! XDG config paths for burrow.
//!
//! burrow uses XDG locations on every platform, the way `gh` and `kubectl`
//! do, rather than platform-native config directories.

use std::path::{Path, PathBuf};

const APP: &str = "burrow";

/// Name of the config file in both user and project directories
pub const CONFIG_FILENAME: &str = "config.toml";

/// Environment variable overriding the project config directory
pub const PROJECT_CONFIG_ENV: &str = "BURROW_PROJECT_CONFIG_DIR";

/// Get the burrow config directory.
///
/// Returns `$XDG_CONFIG_HOME/burrow` if set, otherwise `~/.config/burrow`.
///
/// # Examples
///
/// ```
/// use burrow_paths::config_dir;
///
/// let file = config_dir().join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    resolve_config_dir(
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        dirs::home_dir(),
    )
}

/// User-level config file
pub fn user_config_file() -> PathBuf {
    config_dir().join(CONFIG_FILENAME)
}

/// Project-level config directory: `$BURROW_PROJECT_CONFIG_DIR` or `./.burrow`
pub fn project_config_dir() -> PathBuf {
    std::env::var_os(PROJECT_CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".burrow"))
}

/// Project-level config file
pub fn project_config_file() -> PathBuf {
    project_config_dir().join(CONFIG_FILENAME)
}

fn resolve_config_dir(xdg_config: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    match (xdg_config, home) {
        (Some(xdg), _) if !xdg.as_os_str().is_empty() => xdg.join(APP),
        (_, Some(home)) => home.join(".config").join(APP),
        _ => Path::new(".config").join(APP),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_config_home_wins() {
        let dir = resolve_config_dir(
            Some(PathBuf::from("/tmp/xdg")),
            Some(PathBuf::from("/home/me")),
        );
        assert_eq!(dir, PathBuf::from("/tmp/xdg/burrow"));
    }

    #[test]
    fn empty_xdg_falls_back_to_home() {
        let dir = resolve_config_dir(Some(PathBuf::new()), Some(PathBuf::from("/home/me")));
        assert_eq!(dir, PathBuf::from("/home/me/.config/burrow"));
    }

    #[test]
    fn no_home_uses_relative_path() {
        assert_eq!(resolve_config_dir(None, None), PathBuf::from(".config/burrow"));
    }

    #[test]
    fn config_files_are_named_config_toml() {
        assert!(user_config_file().ends_with("burrow/config.toml"));
        assert!(project_config_file().ends_with(CONFIG_FILENAME));
    }
}
