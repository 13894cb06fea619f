use std::fmt::Write as _;
use std::time::Duration;

use crate::adapter::{CheckResult, Severity};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum ReportFormat {
    #[default]
    Text,
    Json,
    Markdown,
    Html,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct Summary {
    pub(crate) tools: usize,
    pub(crate) failed: usize,
    pub(crate) files_processed: usize,
    pub(crate) cached: usize,
    pub(crate) errors: usize,
    pub(crate) warnings: usize,
    pub(crate) infos: usize,
    pub(crate) duration: Duration,
}

/// Consolidated run report.
#[derive(Debug, serde::Serialize)]
pub(crate) struct Report {
    pub(crate) summary: Summary,
    pub(crate) results: Vec<CheckResult>,
}

impl Report {
    pub(crate) fn new(results: Vec<CheckResult>) -> Self {
        let mut summary = Summary {
            tools: results.len(),
            failed: 0,
            files_processed: 0,
            cached: 0,
            errors: 0,
            warnings: 0,
            infos: 0,
            duration: Duration::ZERO,
        };
        for result in &results {
            if !result.success {
                summary.failed += 1;
            }
            if result.cached {
                summary.cached += 1;
            }
            summary.files_processed += result.files_processed;
            summary.duration += result.duration;
            for issue in &result.issues {
                match issue.severity {
                    Severity::Error => summary.errors += 1,
                    Severity::Warning => summary.warnings += 1,
                    Severity::Info => summary.infos += 1,
                }
            }
        }
        Self { summary, results }
    }

    pub(crate) fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Text => self.render_text(),
            ReportFormat::Json => {
                serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
            }
            ReportFormat::Markdown => self.render_markdown(),
            ReportFormat::Html => self.render_html(),
        }
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            let status = if !result.success {
                "FAIL"
            } else if result.cached {
                "ok (cached)"
            } else {
                "ok"
            };
            let _ = writeln!(
                out,
                "{:<16} {:<10} {} files, {} issues ({:.1?})",
                result.tool,
                status,
                result.files_processed,
                result.issues.len(),
                result.duration,
            );
            for issue in &result.issues {
                let _ = writeln!(
                    out,
                    "  {}:{}:{}: {}: {}",
                    issue.file.display(),
                    issue.line,
                    issue.column,
                    severity_str(issue.severity),
                    issue.message,
                );
            }
            if let Some(error) = &result.error {
                let _ = writeln!(out, "  error: {error}");
            }
        }
        let s = &self.summary;
        let _ = writeln!(
            out,
            "{} tools, {} failed, {} files, {} errors, {} warnings",
            s.tools, s.failed, s.files_processed, s.errors, s.warnings,
        );
        out
    }

    fn render_markdown(&self) -> String {
        let mut out = String::from("| Tool | Status | Files | Issues |\n|---|---|---|---|\n");
        for result in &self.results {
            let status = if result.success { "ok" } else { "failed" };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                result.tool,
                status,
                result.files_processed,
                result.issues.len(),
            );
        }
        let s = &self.summary;
        let _ = write!(
            out,
            "\n{} tools, {} failed, {} errors, {} warnings\n",
            s.tools, s.failed, s.errors, s.warnings,
        );
        out
    }

    fn render_html(&self) -> String {
        let mut rows = String::new();
        for result in &self.results {
            let status = if result.success { "ok" } else { "failed" };
            let _ = write!(
                rows,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&result.tool),
                status,
                result.files_processed,
                result.issues.len(),
            );
        }
        format!(
            "<!doctype html><html><head><title>quality report</title></head><body>\
             <table><tr><th>Tool</th><th>Status</th><th>Files</th><th>Issues</th></tr>\
             {rows}</table></body></html>"
        )
    }
}

fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Issue;
    use std::path::PathBuf;

    fn sample() -> Report {
        Report::new(vec![
            CheckResult {
                tool: "gofumpt".to_string(),
                language: "go".to_string(),
                success: true,
                cached: true,
                files_processed: 3,
                duration: Duration::from_millis(12),
                issues: Vec::new(),
                raw_output: String::new(),
                error: None,
            },
            CheckResult {
                tool: "golangci-lint".to_string(),
                language: "go".to_string(),
                success: false,
                cached: false,
                files_processed: 3,
                duration: Duration::from_millis(80),
                issues: vec![Issue {
                    file: PathBuf::from("main.go"),
                    line: 4,
                    column: 2,
                    severity: Severity::Error,
                    rule: "govet".to_string(),
                    message: "unreachable code".to_string(),
                    suggestion: None,
                }],
                raw_output: String::new(),
                error: Some("exit status 3".to_string()),
            },
        ])
    }

    #[test]
    fn summary_counts() {
        let report = sample();
        assert_eq!(report.summary.tools, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.cached, 1);
        assert_eq!(report.summary.files_processed, 6);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.warnings, 0);
    }

    #[test]
    fn text_lists_issues() {
        let text = sample().render(ReportFormat::Text);
        assert!(text.contains("golangci-lint"));
        assert!(text.contains("main.go:4:2: error: unreachable code"));
        assert!(text.contains("2 tools, 1 failed"));
    }

    #[test]
    fn json_round_trips() {
        let json = sample().render(ReportFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["tools"], 2);
        assert_eq!(value["results"][0]["tool"], "gofumpt");
    }

    #[test]
    fn markdown_has_table_header() {
        let md = sample().render(ReportFormat::Markdown);
        assert!(md.starts_with("| Tool | Status | Files | Issues |"));
    }

    #[test]
    fn html_escapes() {
        let mut report = sample();
        report.results[0].tool = "a<b>".to_string();
        let html = report.render(ReportFormat::Html);
        assert!(html.contains("a&lt;b&gt;"));
    }
}
