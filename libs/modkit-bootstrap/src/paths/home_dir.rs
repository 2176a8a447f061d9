use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Errors for resolving the home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("HOME environment variable is not set")]
    HomeMissing,
    #[error("APPDATA environment variable is not set")]
    AppDataMissing,
    #[error("home_dir must be an absolute path on Windows: {0}")]
    WindowsAbsoluteRequired(String),
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Normalize and resolve the home directory path based on platform rules.
///
/// Rules:
/// - If `config_home` is provided:
///   - Windows: support `~` expansion to the user profile; the final path must be absolute.
///   - Linux/macOS: allow `~` expansion; the final path must be absolute.
/// - If `config_home` is not provided:
///   - Windows: use `%APPDATA%/<default_subdir>` (error if `APPDATA` is missing).
///   - Linux/macOS: use `$HOME/<default_subdir>` (error if `HOME` is missing).
///
/// If `create` is true, the directory is created if missing.
///
/// `default_subdir` is usually ".hyperspot", but can be customized by the caller.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    #[cfg(target_os = "windows")]
    {
        let path = if let Some(raw) = config_home {
            // On Windows, support ~ expansion to the user profile, and require absolute after expansion.
            let expanded: PathBuf = if raw.starts_with('~') {
                let user_home = env::var("USERPROFILE")
                    .or_else(|_| env::var("HOME"))
                    .map_err(|_| HomeDirError::WindowsAbsoluteRequired(raw.clone()))?;
                if raw == "~" {
                    PathBuf::from(user_home)
                } else if let Some(rest) =
                    raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\"))
                {
                    Path::new(&user_home).join(rest)
                } else {
                    // Patterns like "~username" are not supported; fallback to treating as user home join the rest
                    let rest = raw.trim_start_matches('~');
                    let rest = rest.trim_start_matches(['/', '\\']);
                    Path::new(&user_home).join(rest)
                }
            } else {
                PathBuf::from(raw.clone())
            };

            if !expanded.is_absolute() {
                return Err(HomeDirError::WindowsAbsoluteRequired(raw));
            }
            expanded
        } else {
            // Default to %APPDATA%/<default_subdir>
            let appdata = env::var("APPDATA").map_err(|_| HomeDirError::AppDataMissing)?;
            Path::new(&appdata).join(default_subdir)
        };

        if create {
            fs::create_dir_all(&path)?;
        }
        Ok(path)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let path = if let Some(raw) = config_home {
            // Allow ~ expansion at the beginning
            let expanded = if let Some(stripped) = raw.strip_prefix("~/") {
                let home = env::var("HOME").map_err(|_| HomeDirError::HomeMissing)?;
                Path::new(&home).join(stripped)
            } else if raw == "~" {
                let home = env::var("HOME").map_err(|_| HomeDirError::HomeMissing)?;
                PathBuf::from(home)
            } else {
                PathBuf::from(raw.clone())
            };

            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(
                    expanded.to_string_lossy().into(),
                ));
            }
            expanded
        } else {
            // Default to $HOME/<default_subdir>
            let home = env::var("HOME").map_err(|_| HomeDirError::HomeMissing)?;
            Path::new(&home).join(default_subdir)
        };

        if create {
            fs::create_dir_all(&path)?;
        }
        Ok(path)
    }
}
