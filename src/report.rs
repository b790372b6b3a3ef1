use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::Serialize;

use crate::runner::{CaseReport, ProbeOutcome, ProbeReport, ProbeStatus, ToolInvocation};
use crate::types::OutputKind;

/// Default JSONL destination, one file per run.
pub fn default_out_path() -> PathBuf {
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    PathBuf::from(format!("probe-runs/{ts}.jsonl"))
}

pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// One JSONL line per case.
#[derive(Debug, Serialize)]
pub struct CaseRecord<'a> {
    pub scenario: &'a str,
    pub backend: &'a str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'a ProbeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> From<&'a CaseReport> for CaseRecord<'a> {
    fn from(case: &'a CaseReport) -> Self {
        let (outcome, error) = match &case.result {
            Ok(outcome) => (Some(outcome), None),
            Err(error) => (None, Some(error.to_string())),
        };
        Self {
            scenario: &case.name,
            backend: &case.backend,
            ok: case.is_completed(),
            outcome,
            error,
        }
    }
}

pub fn write_record<W: Write>(writer: &mut W, case: &CaseReport) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, &CaseRecord::from(case))?;
    writer.write_all(b"\n")
}

pub fn render_case<W: Write>(out: &mut W, case: &CaseReport, raw: bool) -> io::Result<()> {
    writeln!(
        out,
        "\n{} {} {}",
        "===".bold(),
        case.name.bold(),
        format!("({})", case.backend).dimmed()
    )?;

    match &case.result {
        Ok(outcome) => render_outcome(out, outcome, raw),
        Err(error) => writeln!(out, "{} {error}", "Error:".red().bold()),
    }
}

pub fn render_outcome<W: Write>(out: &mut W, outcome: &ProbeOutcome, raw: bool) -> io::Result<()> {
    writeln!(out, "model: {}", outcome.model)?;
    if let Some(note) = &outcome.observation {
        writeln!(out, "note: {note}")?;
    }

    if let Some(verdict) = &outcome.input_verdict {
        if verdict.violation {
            writeln!(
                out,
                "{} {}",
                "Input blocked:".yellow().bold(),
                verdict.message.as_deref().unwrap_or("safety violation")
            )?;
        } else {
            writeln!(out, "input shield: passed")?;
        }
    }
    if outcome.status == ProbeStatus::Blocked {
        return Ok(());
    }
    if let Some(error) = &outcome.error {
        writeln!(out, "{} {error}", "Interrupted:".red().bold())?;
    }

    let summary = &outcome.summary;
    writeln!(out, "fragments: {}", summary.fragments)?;
    for kind in OutputKind::ALL {
        let count = summary.count(kind);
        if count > 0 {
            writeln!(out, "  {kind}: {count}")?;
        }
    }
    if summary.external_calls > 0 {
        writeln!(out, "  external calls (mcp_call): {}", summary.external_calls)?;
    }
    if summary.text_with_logprobs > 0 {
        writeln!(
            out,
            "logprobs: {} text item(s), {} token entries",
            summary.text_with_logprobs, summary.logprob_tokens
        )?;
    }
    if summary.reasoning_seen() {
        let fields: Vec<&str> = summary.reasoning_fields.iter().map(String::as_str).collect();
        writeln!(out, "reasoning fields: {}", fields.join(", "))?;
    }
    if let Some(usage) = &summary.usage {
        write!(
            out,
            "usage: input {} / output {} / total {}",
            usage.input_tokens, usage.output_tokens, usage.total_tokens
        )?;
        match usage.reasoning_tokens {
            Some(reasoning) => writeln!(out, " (reasoning {reasoning})")?,
            None => writeln!(out)?,
        }
    }

    for invocation in &outcome.invocations {
        render_invocation(out, invocation)?;
    }
    for deviation in &outcome.deviations {
        writeln!(out, "{} {deviation}", "Deviation:".yellow().bold())?;
    }
    if let Some(verdict) = &outcome.output_verdict {
        if verdict.violation {
            writeln!(
                out,
                "{} {}",
                "Output flagged:".yellow().bold(),
                verdict.message.as_deref().unwrap_or("safety violation")
            )?;
        } else {
            writeln!(out, "output shield: passed")?;
        }
    }

    if raw {
        writeln!(out, "{}", "raw fragments:".dimmed())?;
        for fragment in &outcome.fragments {
            let pretty = serde_json::to_string_pretty(fragment.body())?;
            writeln!(out, "{pretty}")?;
        }
    }
    Ok(())
}

fn render_invocation<W: Write>(out: &mut W, invocation: &ToolInvocation) -> io::Result<()> {
    write!(out, "call {}({})", invocation.name, invocation.arguments)?;
    match (&invocation.result, &invocation.error) {
        (Some(result), _) => writeln!(out, " -> {result}")?,
        (None, Some(error)) => writeln!(out, " -> {} {error}", "error:".red())?,
        (None, None) => writeln!(out)?,
    }
    for problem in &invocation.schema_errors {
        writeln!(out, "  schema: {problem}")?;
    }
    Ok(())
}

pub fn render_totals<W: Write>(out: &mut W, report: &ProbeReport) -> io::Result<()> {
    let failed = if report.failed > 0 {
        report.failed.to_string().red().bold()
    } else {
        report.failed.to_string().normal()
    };
    writeln!(
        out,
        "\nScenarios: {} total, {} completed, {failed} failed",
        report.total, report.completed
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::inspector::inspect;
    use crate::types::ResponseFragment;
    use crate::ProbeError;

    fn outcome() -> ProbeOutcome {
        let fragments = vec![ResponseFragment::Complete(json!({
            "output": [
                { "type": "mcp_call", "server_label": "github", "name": "list_branches" },
                { "type": "message", "content": [
                    { "type": "output_text", "text": "main", "logprobs": [{ "token": "main" }] }
                ]}
            ],
            "usage": { "input_tokens": 3, "output_tokens": 1, "total_tokens": 4 }
        }))];
        let (items, summary) = inspect(&fragments);

        ProbeOutcome {
            scenario: "external".into(),
            backend: "openai".into(),
            model: "gpt-4o".into(),
            status: ProbeStatus::Completed,
            fragments,
            items,
            summary,
            deviations: vec!["expected at most 1 unknown item(s), observed 2".into()],
            invocations: Vec::new(),
            input_verdict: None,
            output_verdict: None,
            observation: None,
            error: None,
            elapsed_ms: 12,
        }
    }

    #[test]
    fn renders_counts_and_raw_fragments() {
        let case = CaseReport {
            name: "external".into(),
            backend: "openai".into(),
            result: Ok(outcome()),
        };

        let mut out = Vec::new();
        render_case(&mut out, &case, true).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("external_tool_call: 1"));
        assert!(text.contains("text: 1"));
        assert!(text.contains("external calls (mcp_call): 1"));
        assert!(text.contains("1 text item(s), 1 token entries"));
        assert!(text.contains("usage: input 3 / output 1 / total 4"));
        assert!(text.contains("observed 2"));
        assert!(text.contains("\"list_branches\""));
    }

    #[test]
    fn interrupted_outcomes_keep_their_fragments() {
        let mut partial = outcome();
        partial.status = ProbeStatus::Partial;
        partial.error = Some("invalid response: malformed stream event".into());
        let case = CaseReport {
            name: "external".into(),
            backend: "openai".into(),
            result: Ok(partial),
        };

        let mut out = Vec::new();
        render_case(&mut out, &case, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("malformed stream event"));
        assert!(text.contains("external_tool_call: 1"));

        let mut line = Vec::new();
        write_record(&mut line, &case).unwrap();
        let record: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(record["ok"], false);
        assert_eq!(record["outcome"]["status"], "partial");
        assert_eq!(record["outcome"]["fragments"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn jsonl_records_carry_errors_for_failed_cases() {
        let case = CaseReport {
            name: "reasoning-vllm".into(),
            backend: "vllm".into(),
            result: Err(ProbeError::unavailable("vllm", "connection refused")),
        };

        let mut out = Vec::new();
        write_record(&mut out, &case).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.ends_with('\n'));

        let record: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(record["ok"], false);
        assert_eq!(record["scenario"], "reasoning-vllm");
        assert!(record["error"].as_str().unwrap().contains("connection refused"));
        assert!(record.get("outcome").is_none());
    }

    #[test]
    fn default_out_path_is_timestamped_jsonl() {
        let path = default_out_path();
        assert!(path.starts_with("probe-runs"));
        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("jsonl"));
    }
}
