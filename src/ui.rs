//! Terminal output for the interactive commands: spinners and colored
//! transition results via `indicatif` and `console`.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::machine::AuditRecord;

/// Visual progress for one fired transition.
///
/// Shows an animated spinner while the action chain executes, then a green
/// checkmark with the reached state or a red cross with the error.
pub struct TransitionProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl TransitionProgress {
    pub fn start(subject_id: &str, event: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("{subject_id}: {event}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Prints an intermediate note (e.g. an absorbed conflict) above the
    /// spinner.
    pub fn note(&self, message: &str) {
        self.pb
            .println(format!("  {} {message}", self.yellow.apply_to("↻")));
    }

    pub fn succeeded(&self, to_state: &str) {
        self.pb.finish_and_clear();
        println!("  {} reached {to_state}", self.green.apply_to("✓"));
    }

    pub fn failed(&self, error: &str) {
        self.pb.finish_and_clear();
        println!("  {} {error}", self.red.apply_to("✗"));
    }
}

/// Prints the collected audit trail as pretty JSON.
pub fn print_audit_trail(records: &[AuditRecord]) {
    let style = Style::new().cyan().bold();
    println!();
    println!("{}", style.apply_to("─── Audit Trail ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(records).unwrap_or_default()
    );
}
