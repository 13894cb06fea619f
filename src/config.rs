use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use anyhow::{Context as _, Result};
use tracing::debug;

use crate::detect::LanguageRule;

/// Config file names probed in each directory, nearest first.
const CONFIG_NAMES: &[&str] = &[".gzquality.yml", ".gzquality.yaml", "gzquality.yml"];

fn default<T: Default + PartialEq>(t: &T) -> bool {
    *t == Default::default()
}

fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_true(b: &bool) -> bool {
    *b
}

fn default_max_size() -> u64 {
    100 * 1024 * 1024
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_max_size(size: &u64) -> bool {
    *size == default_max_size()
}

/// Project configuration, `.gzquality.yml` at (or above) the working
/// directory. Every key is optional.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) default_workers: Option<NonZeroUsize>,

    /// Executor deadline.
    #[serde(default, with = "humantime_serde")]
    #[serde(skip_serializing_if = "default")]
    pub(crate) timeout: Option<Duration>,

    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) tools: BTreeMap<String, ToolCfg>,

    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) languages: BTreeMap<String, LanguageCfg>,

    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) exclude: Vec<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) include: Vec<String>,

    #[serde(default)]
    pub(crate) cache: CacheCfg,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ToolCfg {
    #[serde(default = "default_true")]
    #[serde(skip_serializing_if = "is_true")]
    pub(crate) enabled: bool,

    /// Overrides the kind-derived task priority.
    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) priority: Option<u8>,

    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) config_file: Option<PathBuf>,

    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) args: Vec<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) env: BTreeMap<String, String>,
}

impl Default for ToolCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            config_file: None,
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct LanguageCfg {
    #[serde(default = "default_true")]
    #[serde(skip_serializing_if = "is_true")]
    pub(crate) enabled: bool,

    /// Adapters listed here run before the rest for this language.
    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) preferred_tools: Vec<String>,

    /// Extra file extensions attributed to this language.
    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) extensions: Vec<String>,
}

impl Default for LanguageCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            preferred_tools: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CacheCfg {
    #[serde(default = "default_true")]
    #[serde(skip_serializing_if = "is_true")]
    pub(crate) enabled: bool,

    #[serde(default = "default_max_size")]
    #[serde(skip_serializing_if = "is_default_max_size")]
    pub(crate) max_size_bytes: u64,

    /// Entries older than this are evicted; zero disables the bound.
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub(crate) max_age: Duration,

    /// Defaults to `.gzquality-cache` under the project root.
    #[serde(default)]
    #[serde(skip_serializing_if = "default")]
    pub(crate) directory: Option<PathBuf>,
}

fn default_max_age() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

impl Default for CacheCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: default_max_size(),
            max_age: default_max_age(),
            directory: None,
        }
    }
}

impl Config {
    /// Search upward from `start` for the nearest config file. Absence is
    /// not an error.
    pub(crate) fn discover(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        for dir in start.ancestors() {
            for name in CONFIG_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    debug!("Loading config from {}", candidate.display());
                    return Ok(Some((Self::load(&candidate)?, candidate)));
                }
            }
        }
        debug!("No config file found above {}", start.display());
        Ok(None)
    }

    pub(crate) fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file: {}", path.display()));
            }
        };
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub(crate) fn tool(&self, name: &str) -> ToolCfg {
        self.tools.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn language(&self, name: &str) -> LanguageCfg {
        self.languages.get(name).cloned().unwrap_or_default()
    }

    /// Builtin detection rules adjusted by the `languages` section:
    /// disabled languages are dropped, extra extensions appended.
    pub(crate) fn detection_rules(&self) -> Vec<LanguageRule> {
        let mut rules = crate::detect::builtin_rules();
        rules.retain(|rule| self.language(rule.name).enabled);
        for rule in &mut rules {
            for ext in &self.language(rule.name).extensions {
                let ext = ext.trim_start_matches('.').to_string();
                if !rule.extensions.contains(&ext) {
                    rule.extensions.push(ext);
                }
            }
        }
        rules
    }

    pub(crate) fn cache_dir(&self, root: &Path) -> PathBuf {
        self.cache
            .directory
            .clone()
            .unwrap_or_else(|| root.join(".gzquality-cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_document_is_default() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_size_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn full_document() {
        let yaml = r"
default_workers: 4
timeout: 2m
tools:
  golangci-lint:
    enabled: true
    priority: 8
    config_file: .golangci.yml
    args: [--fast]
    env:
      GOFLAGS: -mod=vendor
languages:
  go:
    preferred_tools: [gofumpt]
  markdown:
    enabled: false
exclude:
  - 'generated/**'
cache:
  enabled: false
  max_size_bytes: 1048576
  max_age: 1h
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_workers, NonZeroUsize::new(4));
        assert_eq!(config.timeout, Some(Duration::from_secs(120)));
        let tool = config.tool("golangci-lint");
        assert_eq!(tool.priority, Some(8));
        assert_eq!(tool.args, vec!["--fast"]);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_age, Duration::from_secs(3600));
        // unknown tools fall back to defaults
        assert!(config.tool("rustfmt").enabled);
    }

    #[test]
    fn disabled_language_dropped_from_rules() {
        let yaml = "languages:\n  markdown:\n    enabled: false\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let rules = config.detection_rules();
        assert!(!rules.iter().any(|r| r.name == "markdown"));
        assert!(rules.iter().any(|r| r.name == "go"));
    }

    #[test]
    fn extra_extensions_appended() {
        let yaml = "languages:\n  python:\n    extensions: ['.pyw']\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let rules = config.detection_rules();
        let python = rules.iter().find(|r| r.name == "python").unwrap();
        assert!(python.extensions.iter().any(|e| e == "pyw"));
    }

    #[test]
    fn discover_searches_upward() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(".gzquality.yml"), "default_workers: 2\n").unwrap();
        let (config, path) = Config::discover(&nested).unwrap().unwrap();
        assert_eq!(config.default_workers, NonZeroUsize::new(2));
        assert_eq!(path, dir.path().join(".gzquality.yml"));
    }

    #[test]
    fn discover_without_config() {
        let dir = TempDir::new().unwrap();
        // may still find a config above the tempdir root on odd setups,
        // so only check the nominal case
        if let Some((_, path)) = Config::discover(dir.path()).unwrap() {
            assert!(!path.starts_with(dir.path()));
        }
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(serde_yaml::from_str::<Config>("no_such_key: 1\n").is_err());
    }
}
