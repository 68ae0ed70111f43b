use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::models::{BuildStatus, TestRunResult};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn status_cell(status: BuildStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        BuildStatus::Succeeded => cell.fg(TableColor::Green),
        BuildStatus::Failed => cell.fg(TableColor::Red),
        BuildStatus::Unstable | BuildStatus::Aborted => cell.fg(TableColor::Yellow),
        BuildStatus::Running | BuildStatus::Queued => cell.fg(TableColor::Blue),
        BuildStatus::NotRun => cell.fg(TableColor::DarkGrey),
    }
}

pub fn test_result_cell(result: TestRunResult) -> Cell {
    match result {
        TestRunResult::Passed => Cell::new("passed").fg(TableColor::Green),
        TestRunResult::Failed => Cell::new("failed").fg(TableColor::Red),
        TestRunResult::Skipped => Cell::new("skipped").fg(TableColor::Yellow),
    }
}

pub fn duration_cell(duration_ms: Option<i64>) -> Cell {
    match duration_ms {
        #[allow(clippy::cast_precision_loss)]
        Some(ms) => Cell::new(format!("{:.1}s", ms as f64 / 1000.0)),
        None => Cell::new("-").fg(TableColor::DarkGrey),
    }
}
