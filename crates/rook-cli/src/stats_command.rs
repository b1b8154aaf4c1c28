use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rook_core::write_text_atomic;
use rook_state::{IssueRecord, IssueStateStore};

use crate::cli_args::StatsArgs;
use crate::config::RookConfig;

const CSV_HEADER: [&str; 12] = [
    "Owner",
    "Repository",
    "Issue Number",
    "Status",
    "PR Number",
    "Input Tokens",
    "Output Tokens",
    "Total Tokens",
    "Cost",
    "Created At",
    "Updated At",
    "Completed At",
];

pub(crate) fn run_stats(config: &RookConfig, args: &StatsArgs) -> Result<()> {
    let store = IssueStateStore::open(&config.state_db_path).with_context(|| {
        format!(
            "failed to open state database {}",
            config.state_db_path.display()
        )
    })?;
    let records = store.list_all().context("failed to list issue records")?;
    println!("{}", render_stats_report(&records));

    if args.export {
        write_text_atomic(&args.file, &render_usage_csv(&records))
            .with_context(|| format!("failed to export {}", args.file.display()))?;
        println!(
            "exported {} record(s) to {}",
            records.len(),
            args.file.display()
        );
    }
    Ok(())
}

/// Plain-text table of per-issue usage, newest first, with totals and averages.
pub(crate) fn render_stats_report(records: &[IssueRecord]) -> String {
    if records.is_empty() {
        return "No issues tracked yet.".to_string();
    }
    let mut lines = vec![format!(
        "{:<36} {:<26} {:>12} {:>12} {:>12}",
        "Issue", "Status", "Input", "Output", "Cost (USD)"
    )];
    let mut input_total = 0_u64;
    let mut output_total = 0_u64;
    let mut cost_total = 0.0_f64;
    for record in records {
        input_total = input_total.saturating_add(record.usage.input_tokens);
        output_total = output_total.saturating_add(record.usage.output_tokens);
        cost_total += record.usage.cost_usd;
        lines.push(format!(
            "{:<36} {:<26} {:>12} {:>12} {:>12}",
            record.slug(),
            record.status.as_str(),
            record.usage.input_tokens,
            record.usage.output_tokens,
            format!("${:.4}", record.usage.cost_usd)
        ));
    }
    let count = records.len() as u64;
    lines.push(String::new());
    lines.push(format!(
        "{:<36} {:<26} {:>12} {:>12} {:>12}",
        format!("Total ({count} issues)"),
        "",
        input_total,
        output_total,
        format!("${cost_total:.4}")
    ));
    lines.push(format!(
        "{:<36} {:<26} {:>12} {:>12} {:>12}",
        "Average per issue",
        "",
        input_total / count,
        output_total / count,
        format!("${:.4}", cost_total / count as f64)
    ));
    lines.join("\n")
}

pub(crate) fn render_usage_csv(records: &[IssueRecord]) -> String {
    let mut rows = vec![CSV_HEADER.join(",")];
    for record in records {
        let fields = [
            record.owner.clone(),
            record.repo.clone(),
            record.issue_number.to_string(),
            record.status.as_str().to_string(),
            record
                .pull_request_number
                .map(|number| number.to_string())
                .unwrap_or_default(),
            record.usage.input_tokens.to_string(),
            record.usage.output_tokens.to_string(),
            record.usage.total_tokens().to_string(),
            format!("{:.6}", record.usage.cost_usd),
            format_timestamp(record.created_at),
            format_timestamp(record.updated_at),
            record.completed_at.map(format_timestamp).unwrap_or_default(),
        ];
        rows.push(
            fields
                .iter()
                .map(|field| escape_csv_field(field))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    let mut csv = rows.join("\n");
    csv.push('\n');
    csv
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
