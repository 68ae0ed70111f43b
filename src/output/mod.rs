mod styling;
mod summary;
mod tables;

use styling::{banner_title, muted};
pub use summary::{render_history, render_jobs, render_pipeline, render_snapshot, render_tests};

/// Prints the bridge banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        banner_title("octane-bridge"),
        muted(env!("CARGO_PKG_VERSION")),
        muted("Octane CI plugin bridge")
    );
}
