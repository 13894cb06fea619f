use std::sync::Arc;

use crate::adapter::{CommandAdapter, ExecuteOptions, Phase, ToolKind, ToolSpec};
use crate::parse::OutputParser;
use crate::probe::Probe;
use crate::registry::Registry;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|a| (*a).to_string()).collect()
}

fn with_config(mut argv: Vec<String>, flag: &str, options: &ExecuteOptions) -> Vec<String> {
    if let Some(config) = &options.config_file {
        argv.push(flag.to_string());
        argv.push(config.display().to_string());
    }
    argv
}

pub(crate) fn builtin_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "gofumpt",
            language: "go",
            kind: ToolKind::Formatter,
            executable: "gofumpt",
            install: &["go", "install", "mvdan.cc/gofumpt@latest"],
            extensions: &["go"],
            config_patterns: &[],
            pass_files: true,
            build_args: |_, _| args(&["-w"]),
            parser: OutputParser::None,
        },
        ToolSpec {
            name: "golangci-lint",
            language: "go",
            kind: ToolKind::Linter,
            executable: "golangci-lint",
            install: &[
                "go",
                "install",
                "github.com/golangci/golangci-lint/cmd/golangci-lint@latest",
            ],
            extensions: &["go"],
            config_patterns: &[
                ".golangci.yml",
                ".golangci.yaml",
                ".golangci.toml",
                ".golangci.json",
            ],
            pass_files: true,
            build_args: |_, options| {
                let mut argv = args(&["run", "--out-format", "json"]);
                if options.fix {
                    argv.push("--fix".to_string());
                }
                with_config(argv, "--config", options)
            },
            parser: OutputParser::Golangci,
        },
        ToolSpec {
            name: "rustfmt",
            language: "rust",
            kind: ToolKind::Formatter,
            executable: "rustfmt",
            install: &["rustup", "component", "add", "rustfmt"],
            extensions: &["rs"],
            config_patterns: &["rustfmt.toml", ".rustfmt.toml"],
            pass_files: true,
            build_args: |_, options| {
                with_config(args(&["--edition", "2021"]), "--config-path", options)
            },
            parser: OutputParser::None,
        },
        ToolSpec {
            name: "clippy",
            language: "rust",
            kind: ToolKind::Linter,
            executable: "cargo",
            install: &["rustup", "component", "add", "clippy"],
            extensions: &["rs"],
            config_patterns: &["clippy.toml", ".clippy.toml"],
            // whole-project tool, takes no file arguments
            pass_files: false,
            build_args: |_, options| {
                let mut argv = args(&["clippy", "--message-format", "short"]);
                if options.fix {
                    argv.extend(args(&["--fix", "--allow-dirty"]));
                }
                argv
            },
            parser: OutputParser::Gnu,
        },
        ToolSpec {
            name: "ruff-format",
            language: "python",
            kind: ToolKind::Formatter,
            executable: "ruff",
            install: &["pip", "install", "ruff"],
            extensions: &["py", "pyi"],
            config_patterns: &["ruff.toml", ".ruff.toml", "pyproject.toml"],
            pass_files: true,
            build_args: |_, options| with_config(args(&["format"]), "--config", options),
            parser: OutputParser::None,
        },
        ToolSpec {
            name: "ruff",
            language: "python",
            kind: ToolKind::Linter,
            executable: "ruff",
            install: &["pip", "install", "ruff"],
            extensions: &["py", "pyi"],
            config_patterns: &["ruff.toml", ".ruff.toml", "pyproject.toml"],
            pass_files: true,
            build_args: |_, options| {
                let mut argv = args(&["check", "--output-format", "json"]);
                if options.fix {
                    argv.push("--fix".to_string());
                }
                with_config(argv, "--config", options)
            },
            parser: OutputParser::Ruff,
        },
        ToolSpec {
            name: "prettier",
            language: "javascript",
            kind: ToolKind::Formatter,
            executable: "prettier",
            install: &["npm", "install", "-g", "prettier"],
            extensions: &["js", "jsx", "mjs", "cjs", "ts", "tsx", "json"],
            config_patterns: &[
                ".prettierrc",
                ".prettierrc.json",
                ".prettierrc.yml",
                "prettier.config.js",
            ],
            pass_files: true,
            build_args: |_, options| with_config(args(&["--write"]), "--config", options),
            parser: OutputParser::None,
        },
        ToolSpec {
            name: "eslint",
            language: "javascript",
            kind: ToolKind::Linter,
            executable: "eslint",
            install: &["npm", "install", "-g", "eslint"],
            extensions: &["js", "jsx", "mjs", "cjs", "ts", "tsx"],
            config_patterns: &[
                "eslint.config.js",
                ".eslintrc.json",
                ".eslintrc.js",
                ".eslintrc.yml",
            ],
            pass_files: true,
            build_args: |_, options| {
                let mut argv = args(&["--format", "json"]);
                if options.fix {
                    argv.push("--fix".to_string());
                }
                with_config(argv, "--config", options)
            },
            parser: OutputParser::Eslint,
        },
        ToolSpec {
            name: "biome",
            language: "javascript",
            kind: ToolKind::Both,
            executable: "biome",
            install: &["npm", "install", "-g", "@biomejs/biome"],
            extensions: &["js", "jsx", "ts", "tsx", "json"],
            config_patterns: &["biome.json", "biome.jsonc"],
            pass_files: true,
            build_args: |phase, options| match phase {
                Phase::Format => args(&["format", "--write"]),
                Phase::Lint => {
                    if options.fix {
                        args(&["lint", "--write"])
                    } else {
                        args(&["lint"])
                    }
                }
            },
            parser: OutputParser::Gnu,
        },
        ToolSpec {
            name: "shfmt",
            language: "shell",
            kind: ToolKind::Formatter,
            executable: "shfmt",
            install: &["go", "install", "mvdan.cc/sh/v3/cmd/shfmt@latest"],
            extensions: &["sh", "bash"],
            config_patterns: &[".editorconfig"],
            pass_files: true,
            build_args: |_, _| args(&["-w"]),
            parser: OutputParser::None,
        },
        ToolSpec {
            name: "shellcheck",
            language: "shell",
            kind: ToolKind::Linter,
            executable: "shellcheck",
            install: &[],
            extensions: &["sh", "bash"],
            config_patterns: &[".shellcheckrc"],
            pass_files: true,
            build_args: |_, _| args(&["--format", "gcc"]),
            parser: OutputParser::Gnu,
        },
    ]
}

/// Populate `registry` with every builtin adapter, sharing one probe.
pub(crate) fn register_builtin(registry: &Registry, probe: &Arc<Probe>) {
    for spec in builtin_specs() {
        registry.register(Arc::new(CommandAdapter::new(spec, Arc::clone(probe))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    #[test]
    fn names_unique() {
        let specs = builtin_specs();
        let names: HashSet<_> = specs.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), specs.len());
    }

    #[test]
    fn every_language_has_a_formatter_and_a_linter() {
        let specs = builtin_specs();
        let languages: HashSet<_> = specs.iter().map(|s| s.language).collect();
        for language in languages {
            assert!(
                specs
                    .iter()
                    .any(|s| s.language == language && s.kind.matches(ToolKind::Formatter)),
                "{language} has no formatter"
            );
            assert!(
                specs
                    .iter()
                    .any(|s| s.language == language && s.kind.matches(ToolKind::Linter)),
                "{language} has no linter"
            );
        }
    }

    #[test]
    fn golangci_args() {
        let spec = builtin_specs()
            .into_iter()
            .find(|s| s.name == "golangci-lint")
            .unwrap();
        let plain = (spec.build_args)(Phase::Lint, &ExecuteOptions::default());
        assert_eq!(plain, vec!["run", "--out-format", "json"]);

        let opts = ExecuteOptions {
            fix: true,
            config_file: Some(PathBuf::from(".golangci.yml")),
            ..Default::default()
        };
        let argv = (spec.build_args)(Phase::Lint, &opts);
        assert_eq!(
            argv,
            vec!["run", "--out-format", "json", "--fix", "--config", ".golangci.yml"]
        );
    }

    #[test]
    fn biome_phases_differ() {
        let spec = builtin_specs().into_iter().find(|s| s.name == "biome").unwrap();
        assert_eq!(spec.kind, ToolKind::Both);
        let format = (spec.build_args)(Phase::Format, &ExecuteOptions::default());
        let lint = (spec.build_args)(Phase::Lint, &ExecuteOptions::default());
        assert_ne!(format, lint);
        assert_eq!(format[0], "format");
        assert_eq!(lint[0], "lint");
    }

    #[test]
    fn registration_covers_all_specs() {
        let registry = Registry::new();
        register_builtin(&registry, &Arc::new(Probe::new()));
        assert_eq!(registry.all().len(), builtin_specs().len());
        assert!(registry.find("gofumpt").is_some());
        assert!(registry.find("golangci-lint").is_some());
    }
}
