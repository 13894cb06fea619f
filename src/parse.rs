use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::adapter::{Issue, Severity};
use crate::error::Error;

/// Output schema an adapter expects. Structured parsers degrade to the
/// line-oriented parser when the payload does not match, and to zero
/// issues after that.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputParser {
    /// `golangci-lint run --out-format json`
    Golangci,
    /// `eslint --format json`
    Eslint,
    /// `ruff check --output-format json`
    Ruff,
    /// `file:line[:column]: [severity:] message` lines
    Gnu,
    /// No issue output expected (formatters).
    None,
}

impl OutputParser {
    pub(crate) fn parse(self, stdout: &str, stderr: &str, root: &Path) -> Vec<Issue> {
        let issues = match self {
            OutputParser::None => return Vec::new(),
            OutputParser::Golangci => parse_golangci(stdout, root),
            OutputParser::Eslint => parse_eslint(stdout, root),
            OutputParser::Ruff => parse_ruff(stdout, root),
            OutputParser::Gnu => Some(parse_gnu(stdout, stderr, root)),
        };
        match issues {
            Some(issues) => issues,
            Option::None => {
                debug!(
                    "{}, degrading to the line parser",
                    Error::ParseFailed("output did not match the expected schema".to_string()),
                );
                parse_gnu(stdout, stderr, root)
            }
        }
    }
}

/// Issue paths are reported relative to the project root so they line up
/// with planner file sets.
fn normalise(path: &str, root: &Path) -> PathBuf {
    let path = Path::new(path);
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn parse_golangci(stdout: &str, root: &Path) -> Option<Vec<Issue>> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).ok()?;
    let issues = value.get("Issues")?.as_array()?;
    Some(
        issues
            .iter()
            .filter_map(|issue| {
                let pos = issue.get("Pos")?;
                Some(Issue {
                    file: normalise(pos.get("Filename")?.as_str()?, root),
                    line: pos.get("Line").and_then(|l| l.as_u64()).unwrap_or(0) as u32,
                    column: pos.get("Column").and_then(|c| c.as_u64()).unwrap_or(0) as u32,
                    severity: match issue.get("Severity").and_then(|s| s.as_str()) {
                        Some("error") => Severity::Error,
                        Some("info") => Severity::Info,
                        _ => Severity::Warning,
                    },
                    rule: issue
                        .get("FromLinter")
                        .and_then(|l| l.as_str())
                        .unwrap_or("")
                        .to_string(),
                    message: issue.get("Text")?.as_str()?.to_string(),
                    suggestion: None,
                })
            })
            .collect(),
    )
}

fn parse_eslint(stdout: &str, root: &Path) -> Option<Vec<Issue>> {
    let files: serde_json::Value = serde_json::from_str(stdout.trim()).ok()?;
    let files = files.as_array()?;
    let mut issues = Vec::new();
    for file in files {
        let path = normalise(file.get("filePath")?.as_str()?, root);
        for message in file.get("messages")?.as_array()? {
            issues.push(Issue {
                file: path.clone(),
                line: message.get("line").and_then(|l| l.as_u64()).unwrap_or(0) as u32,
                column: message.get("column").and_then(|c| c.as_u64()).unwrap_or(0) as u32,
                severity: match message.get("severity").and_then(|s| s.as_u64()) {
                    Some(2) => Severity::Error,
                    Some(1) => Severity::Warning,
                    _ => Severity::Info,
                },
                rule: message
                    .get("ruleId")
                    .and_then(|r| r.as_str())
                    .unwrap_or("")
                    .to_string(),
                message: message.get("message")?.as_str()?.to_string(),
                suggestion: None,
            });
        }
    }
    Some(issues)
}

fn parse_ruff(stdout: &str, root: &Path) -> Option<Vec<Issue>> {
    let diagnostics: serde_json::Value = serde_json::from_str(stdout.trim()).ok()?;
    let diagnostics = diagnostics.as_array()?;
    Some(
        diagnostics
            .iter()
            .filter_map(|diag| {
                let location = diag.get("location")?;
                Some(Issue {
                    file: normalise(diag.get("filename")?.as_str()?, root),
                    line: location.get("row").and_then(|r| r.as_u64()).unwrap_or(0) as u32,
                    column: location.get("column").and_then(|c| c.as_u64()).unwrap_or(0) as u32,
                    severity: Severity::Warning,
                    rule: diag
                        .get("code")
                        .and_then(|c| c.as_str())
                        .unwrap_or("")
                        .to_string(),
                    message: diag.get("message")?.as_str()?.to_string(),
                    suggestion: diag
                        .get("fix")
                        .and_then(|f| f.get("message"))
                        .and_then(|m| m.as_str())
                        .map(String::from),
                })
            })
            .collect(),
    )
}

fn gnu_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)] // pattern is a literal
    RE.get_or_init(|| {
        Regex::new(r"^(?P<file>[^:\s][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?:(?P<sev>error|warning|info|note)[:\s]\s*)?(?P<msg>.+)$").unwrap()
    })
}

fn parse_gnu(stdout: &str, stderr: &str, root: &Path) -> Vec<Issue> {
    let re = gnu_line_re();
    stdout
        .lines()
        .chain(stderr.lines())
        .filter_map(|line| {
            let caps = re.captures(line.trim())?;
            Some(Issue {
                file: normalise(&caps["file"], root),
                line: caps["line"].parse().unwrap_or(0),
                column: caps
                    .name("col")
                    .and_then(|c| c.as_str().parse().ok())
                    .unwrap_or(0),
                severity: match caps.name("sev").map(|s| s.as_str()) {
                    Some("error") => Severity::Error,
                    Some("info" | "note") => Severity::Info,
                    _ => Severity::Warning,
                },
                rule: String::new(),
                message: caps["msg"].to_string(),
                suggestion: None,
            })
        })
        .collect()
}
