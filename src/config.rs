//! INI-backed settings, passed explicitly to the loader and plugins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use configparser::ini::Ini;

use crate::error::LoaderError;

const DEFAULT_PLUGIN_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CACHE_CAPACITY: u64 = 10_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;

const DEFAULT_POPULAR: &[&str] = &[
    "org.mozilla.firefox",
    "org.gnome.Maps",
    "org.gimp.GIMP",
    "org.libreoffice.LibreOffice",
    "org.inkscape.Inkscape",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    path: Option<PathBuf>,
    /// Worker pool size; 0 lets rayon pick.
    pub worker_threads: usize,
    pub plugin_timeout: Duration,
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub cache_capacity: u64,
    pub cache_ttl: Duration,
    pub provenance_sources: Vec<String>,
    pub blocklist: Vec<String>,
    pub popular: Vec<String>,
    pub featured: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            path: None,
            worker_threads: 0,
            plugin_timeout: Duration::from_secs(DEFAULT_PLUGIN_TIMEOUT_SECS),
            allowlist: Vec::new(),
            denylist: Vec::new(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            provenance_sources: vec!["system".to_string()],
            blocklist: Vec::new(),
            popular: DEFAULT_POPULAR.iter().map(|s| s.to_string()).collect(),
            featured: Vec::new(),
        }
    }
}

impl Settings {
    /// `$XDG_CONFIG_HOME/appfront/appfront.ini` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("appfront").join("appfront.ini"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load_default() -> Result<Self, LoaderError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`. A missing file yields the defaults, remembering the
    /// path so a later [`Settings::reload`] picks the file up.
    pub fn load(path: &Path) -> Result<Self, LoaderError> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| LoaderError::Config(format!("{}: {}", path.display(), e)))?;
            Self::parse(&content)
                .map_err(|e| LoaderError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            Self::default()
        };
        settings.path = Some(path.to_path_buf());
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let mut ini = Ini::new();
        ini.set_comment_symbols(&['#']);
        ini.read(content.to_string())?;

        let mut settings = Self::default();

        if let Some(n) = get_u64(&ini, "loader", "worker-threads")? {
            settings.worker_threads = n as usize;
        }
        if let Some(secs) = get_u64(&ini, "loader", "plugin-timeout")? {
            if secs == 0 {
                return Err("[loader] plugin-timeout must be greater than 0".to_string());
            }
            settings.plugin_timeout = Duration::from_secs(secs);
        }
        if let Some(list) = get_list(&ini, "loader", "allowlist") {
            settings.allowlist = list;
        }
        if let Some(list) = get_list(&ini, "loader", "denylist") {
            settings.denylist = list;
        }
        if let Some(n) = get_u64(&ini, "cache", "capacity")? {
            settings.cache_capacity = n;
        }
        if let Some(secs) = get_u64(&ini, "cache", "ttl")? {
            settings.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(list) = get_list(&ini, "provenance", "sources") {
            settings.provenance_sources = list;
        }
        if let Some(list) = get_list(&ini, "blocklist", "ids") {
            settings.blocklist = list;
        }
        if let Some(list) = get_list(&ini, "popular", "ids") {
            settings.popular = list;
        }
        if let Some(list) = get_list(&ini, "featured", "ids") {
            settings.featured = list;
        }

        Ok(settings)
    }

    /// Re-read the file these settings came from. In-memory settings are
    /// left unchanged.
    pub fn reload(&mut self) -> Result<(), LoaderError> {
        if let Some(path) = self.path.clone() {
            *self = Self::load(&path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn get_u64(ini: &Ini, section: &str, key: &str) -> Result<Option<u64>, String> {
    match ini.get(section, key) {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("[{}] {}: expected a number, got '{}'", section, key, v)),
    }
}

/// Comma- or semicolon-separated list.
fn get_list(ini: &Ini, section: &str, key: &str) -> Option<Vec<String>> {
    ini.get(section, key).map(|v| {
        v.trim_matches('"')
            .split([';', ','])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.plugin_timeout, Duration::from_secs(60));
        assert!(settings.path().is_none());
    }

    #[test]
    fn test_parse_sections() {
        let content = r#"
[loader]
worker-threads = 2
plugin-timeout = 5
denylist = flatpak, snap

[cache]
capacity = 50

[blocklist]
ids = org.example.*, com.bad.App
"#;
        let settings = Settings::parse(content).unwrap();
        assert_eq!(settings.worker_threads, 2);
        assert_eq!(settings.plugin_timeout, Duration::from_secs(5));
        assert_eq!(settings.denylist, vec!["flatpak", "snap"]);
        assert_eq!(settings.cache_capacity, 50);
        assert_eq!(settings.blocklist, vec!["org.example.*", "com.bad.App"]);
        assert_eq!(settings.popular.len(), DEFAULT_POPULAR.len());
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let err = Settings::parse("[loader]\nplugin-timeout = soon\n").unwrap_err();
        assert!(err.contains("plugin-timeout"));
        assert!(Settings::parse("[loader]\nplugin-timeout = 0\n").is_err());
    }

    #[test]
    fn test_load_missing_file_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appfront.ini");
        let mut settings = Settings::load(&path).unwrap();
        assert_eq!(settings.worker_threads, 0);
        assert_eq!(settings.path(), Some(path.as_path()));

        std::fs::write(&path, "[loader]\nworker-threads = 3\n").unwrap();
        settings.reload().unwrap();
        assert_eq!(settings.worker_threads, 3);
        assert_eq!(settings.path(), Some(path.as_path()));
    }
}
