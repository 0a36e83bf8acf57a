//! On-disk layout: database, rule-set files, generated document and logs.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Resolved application paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// SQLite database file.
    pub db: PathBuf,
    /// Directory rule-set `.srs` files are downloaded to.
    pub rule_set_dir: PathBuf,
    /// Generated sing-box document.
    pub output: PathBuf,
    /// Rolling log files.
    pub logs: PathBuf,
}

impl AppPaths {
    /// Lays everything out under one data directory.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            db: root.join("subforge.db"),
            rule_set_dir: root.join("rules"),
            output: root.join("config.json"),
            logs: root.join("logs"),
        }
    }

    /// Uses the platform data directory, if one can be determined.
    pub fn platform() -> Option<Self> {
        ProjectDirs::from("com", "subforge", "subforge").map(|dirs| Self::under(dirs.data_dir()))
    }

    /// Replaces individual paths with explicit ones.
    pub fn with_overrides(
        mut self,
        db: Option<PathBuf>,
        rule_set_dir: Option<PathBuf>,
        output: Option<PathBuf>,
    ) -> Self {
        if let Some(db) = db {
            self.db = db;
        }
        if let Some(dir) = rule_set_dir {
            self.rule_set_dir = dir;
        }
        if let Some(output) = output {
            self.output = output;
        }
        self
    }
}
