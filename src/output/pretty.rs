use std::collections::HashSet;
use std::fmt::Write as _;

use colored::{ColoredString, Colorize};

use crate::notice::Notice;
use crate::queue::{ConflictFlag, MutationOp, MutationRecord, QueueStats};

fn state_icon(record: &MutationRecord, conflicted: bool) -> ColoredString {
    if record.synced {
        "[✓]".green()
    } else if conflicted {
        "[!]".red()
    } else {
        "[ ]".white()
    }
}

fn operation_label(operation: MutationOp) -> ColoredString {
    match operation {
        MutationOp::Create => "create".green(),
        MutationOp::Update => "update".cyan(),
        MutationOp::Delete => "delete".red(),
    }
}

/// Short human summary of a payload: its `title` or `id`, else compact JSON.
fn payload_summary(record: &MutationRecord) -> String {
    let payload = &record.payload;
    for field in ["title", "name", "id"] {
        match payload.get(field) {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(v @ serde_json::Value::Number(_)) => return v.to_string(),
            _ => {},
        }
    }

    let compact = payload.to_string();
    if compact.chars().count() > 48 {
        let head: String = compact.chars().take(45).collect();
        format!("{head}...")
    } else {
        compact
    }
}

/// Format a list of records as a pretty table
pub fn format_records_pretty(
    records: &[MutationRecord],
    flagged: &HashSet<String>,
    title: &str,
) -> String {
    if records.is_empty() {
        return format!("{title} (0 records)\n  Nothing queued");
    }

    let mut output = format!("{title} ({} records)\n", records.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for record in records {
        let conflicted = flagged.contains(&record.id);
        let _ = writeln!(
            output,
            "{} {:<6} {:<8} {}  {}",
            state_icon(record, conflicted),
            operation_label(record.operation),
            record.entity_type.to_string().bold(),
            payload_summary(record),
            record.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }

    output
}

/// Format a single record as pretty output
pub fn format_record_pretty(record: &MutationRecord, conflict: Option<&ConflictFlag>) -> String {
    let mut output = format!(
        "{} {} {}\n",
        state_icon(record, conflict.is_some()),
        operation_label(record.operation),
        record.entity_type.to_string().bold()
    );
    let _ = writeln!(output, "  {}: {}", "ID".dimmed(), record.id);
    let _ = writeln!(
        output,
        "  {}: {}",
        "Created".dimmed(),
        record.created_at.format("%Y-%m-%d %H:%M:%S%.6f UTC")
    );
    let state = if record.synced {
        "synced".green()
    } else {
        "pending".yellow()
    };
    let _ = writeln!(output, "  {}: {state}", "State".dimmed());

    if let Some(flag) = conflict {
        let _ = writeln!(output, "  {}: {}", "Conflict".dimmed(), flag.reason.red());
        let _ = writeln!(
            output,
            "  {}: {}",
            "Flagged".dimmed(),
            flag.flagged_at.format("%Y-%m-%d %H:%M")
        );
    }

    let payload = serde_json::to_string_pretty(&record.payload)
        .unwrap_or_else(|_| record.payload.to_string());
    let _ = writeln!(output, "  {}:", "Payload".dimmed());
    for line in payload.lines() {
        let _ = writeln!(output, "    {line}");
    }

    output
}

/// Format queue statistics as pretty output
pub fn format_stats_pretty(stats: &QueueStats) -> String {
    let mut lines = Vec::new();

    lines.push("Mutation Queue".bold().to_string());
    lines.push("─".repeat(40));
    lines.push(format!(
        "  {}",
        Notice::PendingCount {
            count: stats.pending
        }
        .headline()
    ));

    if stats.pending > 0 {
        lines.push(format!(
            "  {} {}",
            "○".yellow(),
            format!("{} pending", stats.pending).yellow()
        ));
    }
    if stats.conflicted > 0 {
        lines.push(format!(
            "  {} {}",
            "!".red(),
            format!("{} awaiting resolution", stats.conflicted).red()
        ));
    }
    if stats.synced > 0 {
        lines.push(format!(
            "  {} {}",
            "✓".green(),
            format!("{} synced", stats.synced).green()
        ));
    }

    if let Some(oldest) = stats.oldest_pending {
        lines.push(format!(
            "  {}: {}",
            "Oldest pending".dimmed(),
            oldest.format("%Y-%m-%d %H:%M")
        ));
    }
    lines.push(format!("  {}: {} bytes", "Size".dimmed(), stats.size_bytes));

    match &stats.location {
        Some(path) => lines.push(format!("  {}: {}", "Database".dimmed(), path.display())),
        None => lines.push(format!(
            "  {}: {}",
            "Database".dimmed(),
            "in memory, changes will not survive a restart".red()
        )),
    }

    lines.join("\n")
}

/// Format conflicts as pretty output
pub fn format_conflicts_pretty(conflicts: &[(ConflictFlag, Option<MutationRecord>)]) -> String {
    if conflicts.is_empty() {
        return "Conflicts (0)\n  Nothing awaiting resolution".to_string();
    }

    let mut output = format!("Conflicts ({})\n", conflicts.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for (flag, record) in conflicts {
        match record {
            Some(record) => {
                let _ = writeln!(
                    output,
                    "{} {} {} {}",
                    "[!]".red(),
                    operation_label(record.operation),
                    record.entity_type.to_string().bold(),
                    payload_summary(record)
                );
            },
            None => {
                let _ = writeln!(output, "{} {}", "[!]".red(), flag.record_id);
            },
        }
        let _ = writeln!(output, "    {}: {}", "ID".dimmed(), flag.record_id);
        let _ = writeln!(output, "    {}: {}", "Reason".dimmed(), flag.reason);
    }

    output.push_str(&format!(
        "\nUse {} to replay or {} to drop a change.",
        "reportq resolve <id> --retry".cyan(),
        "--discard".cyan()
    ));

    output
}
