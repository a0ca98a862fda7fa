use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use xup_service::{Outcome, PackageProgress, ProgressMessage, ProgressState};

const STATUS_TEMPLATE: &str = "{spinner:.cyan.bold} {wide_msg}";
const PACKAGE_TEMPLATE: &str = "  {prefix:<28!} [{bar:30.cyan/blue}] {pos:>3}% {msg}";

fn status_bar(multi: &MultiProgress) -> ProgressBar {
    let status = multi.add(ProgressBar::new_spinner());
    if let Ok(style) = ProgressStyle::with_template(STATUS_TEMPLATE) {
        status.set_style(style);
    }
    status.enable_steady_tick(Duration::from_millis(80));
    status
}

/// Draws orchestrator progress as one status spinner plus a bar per package.
pub struct Renderer {
    multi: MultiProgress,
    status: ProgressBar,
    bars: HashMap<String, ProgressBar>,
    show_log: bool,
}

impl Renderer {
    pub fn new(show_log: bool) -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), show_log)
    }

    fn with_target(target: ProgressDrawTarget, show_log: bool) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let status = status_bar(&multi);

        Self {
            multi,
            status,
            bars: HashMap::new(),
            show_log,
        }
    }

    /// Brings the status line back for the next command; `Finished` clears it.
    pub fn begin(&mut self) {
        if self.status.is_finished() {
            self.status = status_bar(&self.multi);
        }
    }

    /// Returns the outcome once the command in flight has finished.
    pub fn handle(&mut self, message: ProgressMessage) -> Option<Outcome> {
        match message {
            ProgressMessage::StageChanged(stage) => {
                if !stage.is_idle() {
                    self.status.set_message(format!("{}...", stage));
                }
            }
            ProgressMessage::Status(text) => self.status.set_message(text),
            ProgressMessage::Phase(phase) => self.status.set_message(phase.status_text()),
            ProgressMessage::Package(row) => self.update_row(row),
            ProgressMessage::Log(text) => {
                if self.show_log {
                    let _ = self.multi.println(text.trim_end());
                }
            }
            ProgressMessage::Pending { .. } => {}
            ProgressMessage::Finished(outcome) => {
                self.status.finish_and_clear();
                return Some(outcome);
            }
        }
        None
    }

    fn update_row(&mut self, row: PackageProgress) {
        let multi = &self.multi;
        let bar = self.bars.entry(row.name.clone()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(100));
            if let Ok(style) = ProgressStyle::with_template(PACKAGE_TEMPLATE) {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar.set_prefix(row.name.clone());
            bar
        });

        match row.state {
            ProgressState::Waiting => bar.set_message(row.status_text),
            ProgressState::Active {
                determinate,
                percent,
            } => {
                if determinate {
                    bar.set_position(u64::from(percent));
                }
                bar.set_message(row.status_text);
            }
            ProgressState::Complete => {
                bar.set_position(100);
                bar.finish_with_message(row.status_text);
            }
            ProgressState::Failed => bar.abandon_with_message(row.status_text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xup_core::Stage;

    #[test]
    fn test_status_line_returns_for_next_command() {
        let mut renderer = Renderer::with_target(ProgressDrawTarget::hidden(), false);

        let outcome = renderer.handle(ProgressMessage::Finished(Outcome::UpToDate));
        assert_eq!(outcome, Some(Outcome::UpToDate));
        assert!(renderer.status.is_finished());

        renderer.begin();
        assert!(!renderer.status.is_finished());
        assert_eq!(
            renderer.handle(ProgressMessage::StageChanged(Stage::UpdatingOfficial)),
            None
        );
        assert_eq!(renderer.status.message(), "Updating official packages...");
    }
}
