use std::fmt::Display;

use console::{style, StyledObject};

use crate::models::BuildStatus;

/// Section title above a table or tree.
pub fn heading(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().underlined()
}

pub fn job_label(job_id: impl Display) -> StyledObject<String> {
    style(job_id.to_string()).cyan()
}

pub fn muted(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn banner_title(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Status word in the same colours the tables use.
pub fn status_text(status: BuildStatus) -> StyledObject<&'static str> {
    let text = style(status.as_str());
    match status {
        BuildStatus::Succeeded => text.green(),
        BuildStatus::Failed => text.red().bold(),
        BuildStatus::Unstable | BuildStatus::Aborted => text.yellow(),
        BuildStatus::Running | BuildStatus::Queued => text.blue(),
        BuildStatus::NotRun => text.dim(),
    }
}

/// Closing line of a report: green when nothing went wrong, red otherwise.
pub fn verdict(text: impl Display, healthy: bool) -> StyledObject<String> {
    let text = style(text.to_string()).bright();
    if healthy {
        text.green()
    } else {
        text.red()
    }
}
