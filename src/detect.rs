use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use globset::{Glob, GlobMatcher};
use ignore::WalkBuilder;
use tracing::debug;

/// Directory names never descended into. Hidden directories are skipped
/// by name prefix in addition to this list.
const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "target",
    "dist",
    "build",
    ".next",
    "__pycache__",
    ".pytest_cache",
    ".idea",
    ".vscode",
];

const CONFIDENCE_THRESHOLD: f64 = 0.1;

/// One language-detection rule: extensions and patterns attribute files,
/// indicator filenames (build manifests) strengthen confidence.
#[derive(Clone, Debug)]
pub(crate) struct LanguageRule {
    pub(crate) name: &'static str,
    pub(crate) extensions: Vec<String>,
    pub(crate) indicators: &'static [&'static str],
    pub(crate) patterns: &'static [&'static str],
    pub(crate) min_files: usize,
    pub(crate) weight: f64,
    pub(crate) package_manager: Option<&'static str>,
    pub(crate) build_tool: Option<&'static str>,
}

fn exts(list: &[&str]) -> Vec<String> {
    list.iter().map(|e| (*e).to_string()).collect()
}

pub(crate) fn builtin_rules() -> Vec<LanguageRule> {
    vec![
        LanguageRule {
            name: "go",
            extensions: exts(&["go"]),
            indicators: &["go.mod", "go.sum"],
            patterns: &[],
            min_files: 1,
            weight: 0.9,
            package_manager: Some("go"),
            build_tool: Some("go"),
        },
        LanguageRule {
            name: "rust",
            extensions: exts(&["rs"]),
            indicators: &["Cargo.toml", "Cargo.lock"],
            patterns: &[],
            min_files: 1,
            weight: 0.9,
            package_manager: Some("cargo"),
            build_tool: Some("cargo"),
        },
        LanguageRule {
            name: "python",
            extensions: exts(&["py", "pyi"]),
            indicators: &["pyproject.toml", "setup.py", "requirements.txt"],
            patterns: &[],
            min_files: 1,
            weight: 0.9,
            package_manager: Some("pip"),
            build_tool: None,
        },
        LanguageRule {
            name: "javascript",
            extensions: exts(&["js", "jsx", "mjs", "cjs"]),
            indicators: &["package.json"],
            patterns: &[],
            min_files: 1,
            weight: 0.8,
            package_manager: Some("npm"),
            build_tool: None,
        },
        LanguageRule {
            name: "typescript",
            extensions: exts(&["ts", "tsx"]),
            indicators: &["tsconfig.json", "package.json"],
            // tsconfig variants are JSON files that also count as
            // TypeScript evidence
            patterns: &["tsconfig*.json"],
            min_files: 1,
            weight: 0.8,
            package_manager: Some("npm"),
            build_tool: Some("tsc"),
        },
        LanguageRule {
            name: "json",
            extensions: exts(&["json"]),
            indicators: &[],
            patterns: &[],
            min_files: 1,
            weight: 0.5,
            package_manager: None,
            build_tool: None,
        },
        LanguageRule {
            name: "yaml",
            extensions: exts(&["yml", "yaml"]),
            indicators: &[],
            patterns: &[],
            min_files: 1,
            weight: 0.5,
            package_manager: None,
            build_tool: None,
        },
        LanguageRule {
            name: "shell",
            extensions: exts(&["sh", "bash"]),
            indicators: &[],
            patterns: &[],
            min_files: 1,
            weight: 0.7,
            package_manager: None,
            build_tool: None,
        },
        LanguageRule {
            name: "markdown",
            extensions: exts(&["md", "markdown"]),
            indicators: &[],
            patterns: &[],
            min_files: 2,
            weight: 0.4,
            package_manager: None,
            build_tool: None,
        },
    ]
}

/// Evidence for one language after a walk.
#[derive(Clone, Debug)]
pub(crate) struct LanguagePresence {
    pub(crate) confidence: f64,
    /// Project-relative files attributed by extension or pattern.
    pub(crate) files: Vec<PathBuf>,
    /// Indicator files (build manifests) found at any depth.
    pub(crate) indicators: Vec<PathBuf>,
    pub(crate) package_manager: Option<&'static str>,
    pub(crate) build_tool: Option<&'static str>,
}

/// Detection output: languages above the confidence threshold, keyed by
/// name. BTreeMap keeps iteration deterministic.
#[derive(Clone, Debug, Default)]
pub(crate) struct Detection {
    pub(crate) languages: BTreeMap<String, LanguagePresence>,
}

impl Detection {
    pub(crate) fn files_for(&self, language: &str) -> &[PathBuf] {
        self.languages
            .get(language)
            .map_or(&[], |presence| presence.files.as_slice())
    }
}

struct CompiledRule {
    rule: LanguageRule,
    patterns: Vec<GlobMatcher>,
}

fn compile(rules: Vec<LanguageRule>) -> Result<Vec<CompiledRule>> {
    rules
        .into_iter()
        .map(|rule| {
            let patterns = rule
                .patterns
                .iter()
                .map(|pattern| {
                    Glob::new(pattern)
                        .with_context(|| {
                            format!("Invalid pattern `{pattern}` for language {}", rule.name)
                        })
                        .map(|g| g.compile_matcher())
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(CompiledRule { rule, patterns })
        })
        .collect()
}

fn skip_dir(name: &str) -> bool {
    (name.starts_with('.') && name != "." && name != "..") || IGNORED_DIRS.contains(&name)
}

/// Walk `root` and classify every regular file against every rule. A file
/// matching several rules is attributed to each. Unreadable directories
/// are skipped, not fatal. Deterministic for a fixed tree.
pub(crate) fn detect(root: &Path) -> Result<Detection> {
    detect_with_rules(root, builtin_rules())
}

pub(crate) fn detect_with_rules(root: &Path, rules: Vec<LanguageRule>) -> Result<Detection> {
    let compiled = compile(rules)?;
    let mut files: Vec<Vec<PathBuf>> = vec![Vec::new(); compiled.len()];
    let mut indicators: Vec<Vec<PathBuf>> = vec![Vec::new(); compiled.len()];

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .filter_entry(|entry| {
            // the root itself is exempt, whatever it is called
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && entry.file_name().to_str().is_some_and(skip_dir))
        })
        .build();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let file_name = entry.file_name().to_string_lossy();
        for (idx, compiled_rule) in compiled.iter().enumerate() {
            let rule = &compiled_rule.rule;
            let by_ext = rel
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| rule.extensions.iter().any(|e| e == ext));
            let by_pattern = compiled_rule
                .patterns
                .iter()
                .any(|m| m.is_match(file_name.as_ref()));
            if by_ext || by_pattern {
                files[idx].push(rel.to_path_buf());
            }
            if rule.indicators.iter().any(|i| *i == file_name) {
                indicators[idx].push(rel.to_path_buf());
            }
        }
    }

    let mut languages = BTreeMap::new();
    for (idx, compiled_rule) in compiled.iter().enumerate() {
        let rule = &compiled_rule.rule;
        let confidence = confidence(rule, files[idx].len(), indicators[idx].len());
        if confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }
        debug!(
            "Detected {} (confidence {:.2}, {} files)",
            rule.name,
            confidence,
            files[idx].len()
        );
        let mut attributed = std::mem::take(&mut files[idx]);
        attributed.sort();
        attributed.dedup();
        let mut found_indicators = std::mem::take(&mut indicators[idx]);
        found_indicators.sort();
        languages.insert(
            rule.name.to_string(),
            LanguagePresence {
                confidence,
                files: attributed,
                indicators: found_indicators,
                package_manager: rule.package_manager,
                build_tool: rule.build_tool,
            },
        );
    }
    Ok(Detection { languages })
}

fn confidence(rule: &LanguageRule, files: usize, indicators: usize) -> f64 {
    if files == 0 && indicators == 0 {
        return 0.0;
    }
    let base = if files < rule.min_files {
        rule.weight * files as f64 / rule.min_files as f64
    } else {
        rule.weight
    };
    let extra_files = files.saturating_sub(rule.min_files) as f64;
    (base + 0.1 * extra_files + 0.3 * indicators as f64).min(1.0)
}
