//! The line-oriented configuration file.
//!
//! Searched in `$HOME/.config/pkgdepdb/config`, `$HOME/.pkgdepdb/config` and
//! `/etc/pkgdepdb.conf`, first hit wins. Lines look like `key = value`;
//! blank lines and lines starting with `#`, `/` or `;` are ignored.

use std::env;
use std::path::Path;
use std::path::PathBuf;

use log::warn;

const ETC_CONFIG: &str = "/etc/pkgdepdb.conf";

#[derive(Clone, Debug)]
pub struct Config {
    /// Database file to operate on.
    pub database: Option<PathBuf>,
    /// Log verbosity, 0 through 3.
    pub verbosity: u32,
    /// Only print errors.
    pub quiet: bool,
    /// Record package dependency lists on install.
    pub package_depends: bool,
    /// Record package filelists on install.
    pub package_filelist: bool,
    /// Worker threads for relinking.
    pub max_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            verbosity: 0,
            quiet: false,
            package_depends: true,
            package_filelist: true,
            max_jobs: 1,
        }
    }
}

/// Interpret the usual spellings of a boolean config value.
pub fn str2bool(value: &str) -> bool {
    let value = value
        .split_whitespace()
        .next()
        .unwrap_or("");
    matches!(
        value,
        "true" | "TRUE" | "True" | "on" | "On" | "ON" | "YES" | "Yes" | "yes" | "1"
    )
}

/// Expand a leading `~/` against `$HOME`.
fn expand_tilde(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(value)
}

impl Config {
    /// Read the first configuration file found in the search order. A
    /// missing file is fine; a present file is parsed best-effort with
    /// warnings for unknown keys.
    pub fn read() -> Self {
        let mut paths = Vec::new();
        if let Some(home) = env::var_os("HOME") {
            let home = PathBuf::from(home);
            paths.push(home.join(".config/pkgdepdb/config"));
            paths.push(home.join(".pkgdepdb/config"));
        }
        paths.push(PathBuf::from(ETC_CONFIG));

        let mut config = Self::default();
        for path in paths {
            if let Ok(content) = fs_err::read_to_string(&path) {
                config.parse(&content, &path);
                break;
            }
        }
        config
    }

    fn parse(&mut self, content: &str, path: &Path) {
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(['#', '/', ';']) {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("{}:{}: missing `=` in config entry", path.display(), lineno + 1);
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "database" => self.database = Some(expand_tilde(value)),
                "verbosity" => self.verbosity = value.parse().unwrap_or(0),
                "quiet" => self.quiet = str2bool(value),
                "package_depends" => self.package_depends = str2bool(value),
                "file_lists" => self.package_filelist = str2bool(value),
                "jobs" => self.max_jobs = value.parse().unwrap_or(1),
                _ => warn!(
                    "{}:{}: unknown config option: {}",
                    path.display(),
                    lineno + 1,
                    key
                ),
            }
        }
    }
}
