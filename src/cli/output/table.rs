//! Table output formatting for CLI commands
//!
//! Summary, per-round and budget tables for a finished run, using comfy-table.
//! Colors are dropped when `NO_COLOR` is set or the terminal is dumb.

use std::collections::BTreeMap;
use std::env;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use crate::domain::models::{FinalArtifact, RoundRecord, Verdict};
use crate::services::ResourceUsage;

/// Table formatter for CLI output
pub struct TableFormatter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<u16>,
}

impl TableFormatter {
    /// Create a new table formatter
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    /// Create a new table formatter with custom settings
    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Key/value summary of a finished run.
    pub fn format_summary(&self, artifact: &FinalArtifact) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Field").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);

        let status = if artifact.approved {
            "approved"
        } else {
            "best-effort"
        };
        let verdict_cell = if self.use_colors {
            Cell::new(artifact.verdict.to_string()).fg(verdict_color(artifact.verdict))
        } else {
            Cell::new(artifact.verdict.to_string())
        };
        let totals = &artifact.totals;

        table.add_row(vec![Cell::new("Run"), Cell::new(artifact.run_id.to_string())]);
        table.add_row(vec![Cell::new("Topic"), Cell::new(truncate_text(&artifact.topic, 60))]);
        table.add_row(vec![Cell::new("Mode"), Cell::new(artifact.mode.to_string())]);
        table.add_row(vec![Cell::new("Verdict"), verdict_cell]);
        table.add_row(vec![Cell::new("Status"), Cell::new(status)]);
        table.add_row(vec![
            Cell::new("Rounds"),
            Cell::new(totals.rounds_completed.to_string()),
        ]);
        table.add_row(vec![
            Cell::new("Units"),
            Cell::new(format!(
                "{} attempted, {} succeeded, {} failed, {} denied",
                totals.units_attempted,
                totals.units_succeeded,
                totals.units_failed,
                totals.units_denied
            )),
        ]);
        if totals.duplicates_skipped > 0 {
            table.add_row(vec![
                Cell::new("Duplicates skipped"),
                Cell::new(totals.duplicates_skipped.to_string()),
            ]);
        }
        if let Some(score) = totals.final_score {
            table.add_row(vec![Cell::new("Final score"), Cell::new(format!("{score:.1}"))]);
        }
        if let Some(best) = totals.best_score {
            table.add_row(vec![Cell::new("Best score"), Cell::new(format!("{best:.1}"))]);
        }
        if totals.total_cost > 0.0 {
            table.add_row(vec![
                Cell::new("Cost"),
                Cell::new(format!("{:.4}", totals.total_cost)),
            ]);
        }

        table.to_string()
    }

    /// One row per completed round.
    pub fn format_rounds(&self, rounds: &[RoundRecord]) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Label").add_attribute(Attribute::Bold),
            Cell::new("OK").add_attribute(Attribute::Bold),
            Cell::new("Failed").add_attribute(Attribute::Bold),
            Cell::new("Denied").add_attribute(Attribute::Bold),
            Cell::new("Score").add_attribute(Attribute::Bold),
            Cell::new("Flags").add_attribute(Attribute::Bold),
        ]);

        for record in rounds {
            let failed = record.units_failed();
            let failed_cell = if self.use_colors && failed > 0 {
                Cell::new(failed.to_string()).fg(Color::Red)
            } else {
                Cell::new(failed.to_string())
            };
            let score = record
                .critic_signal
                .as_ref()
                .map_or_else(|| "-".to_string(), |c| format!("{:.1}", c.score));

            table.add_row(vec![
                Cell::new((record.index + 1).to_string()),
                Cell::new(truncate_text(&record.label, 40)),
                Cell::new(record.units_succeeded().to_string()),
                failed_cell,
                Cell::new(record.denied.len().to_string()),
                Cell::new(score),
                Cell::new(if record.flags.is_empty() {
                    "-".to_string()
                } else {
                    record.flags.len().to_string()
                }),
            ]);
        }

        table.to_string()
    }

    /// Used and capped amount per resource.
    pub fn format_budgets(&self, budgets: &BTreeMap<String, ResourceUsage>) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Resource").add_attribute(Attribute::Bold),
            Cell::new("Used").add_attribute(Attribute::Bold),
            Cell::new("Cap").add_attribute(Attribute::Bold),
        ]);

        for (name, usage) in budgets {
            let used_cell = if self.use_colors && usage.used >= usage.cap {
                Cell::new(usage.used.to_string()).fg(Color::Yellow)
            } else {
                Cell::new(usage.used.to_string())
            };
            table.add_row(vec![
                Cell::new(name),
                used_cell,
                Cell::new(usage.cap.to_string()),
            ]);
        }

        table.to_string()
    }

    /// Create a base table with common settings
    fn create_base_table(&self) -> Table {
        let mut table = Table::new();

        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

const fn verdict_color(verdict: Verdict) -> Color {
    match verdict {
        Verdict::StopSuccess => Color::Green,
        Verdict::StopExhausted => Color::Yellow,
        Verdict::Continue => Color::White,
    }
}

/// Check if terminal supports colors
fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

/// Truncate text to max length with ellipsis
fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
