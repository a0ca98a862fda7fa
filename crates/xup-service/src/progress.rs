use serde::{Deserialize, Serialize};
use xup_core::PackageRef;
use xup_pacman::{ActiveMode, ParseEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressState {
    Waiting,
    Active { determinate: bool, percent: u8 },
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageProgress {
    pub name: String,
    pub state: ProgressState,
    pub status_text: String,
}

impl PackageProgress {
    fn waiting(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ProgressState::Waiting,
            status_text: "Waiting".to_string(),
        }
    }
}

/// Per-package rows for the current run, in first-seen order.
///
/// Rows are created on first reference and only go away when the whole
/// table is cleared.
#[derive(Debug, Clone, Default)]
pub struct ProgressTable {
    rows: Vec<PackageProgress>,
}

impl ProgressTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Adds a waiting row for every pending package not already present.
    /// Returns the rows that were added.
    pub fn populate(&mut self, packages: &[PackageRef]) -> Vec<PackageProgress> {
        let mut added = Vec::new();
        for pkg in packages {
            if self.get(&pkg.name).is_none() {
                let row = PackageProgress::waiting(&pkg.name);
                added.push(row.clone());
                self.rows.push(row);
            }
        }
        added
    }

    pub fn get(&self, name: &str) -> Option<&PackageProgress> {
        self.rows.iter().find(|r| r.name == name)
    }

    fn row_mut(&mut self, name: &str) -> &mut PackageProgress {
        let idx = match self.rows.iter().position(|r| r.name == name) {
            Some(idx) => idx,
            None => {
                self.rows.push(PackageProgress::waiting(name));
                self.rows.len() - 1
            }
        };
        &mut self.rows[idx]
    }

    pub fn begin(&mut self, name: &str, mode: ActiveMode) -> PackageProgress {
        let row = self.row_mut(name);
        row.state = ProgressState::Active {
            determinate: false,
            percent: 0,
        };
        row.status_text = format!("{}...", mode);
        row.clone()
    }

    pub fn set_status(&mut self, name: &str, status: &str, determinate: bool) -> PackageProgress {
        let row = self.row_mut(name);
        let percent = match row.state {
            ProgressState::Active { percent, .. } => percent,
            _ => 0,
        };
        row.state = ProgressState::Active {
            determinate,
            percent,
        };
        row.status_text = status.to_string();
        row.clone()
    }

    pub fn set_progress(&mut self, name: &str, percent: u8, status: &str) -> PackageProgress {
        let row = self.row_mut(name);
        row.state = ProgressState::Active {
            determinate: true,
            percent: percent.min(100),
        };
        row.status_text = status.to_string();
        row.clone()
    }

    pub fn complete(&mut self, name: &str) -> PackageProgress {
        let row = self.row_mut(name);
        row.state = ProgressState::Complete;
        row.status_text = "Done".to_string();
        row.clone()
    }

    pub fn fail(&mut self, name: &str) -> PackageProgress {
        let row = self.row_mut(name);
        row.state = ProgressState::Failed;
        row.status_text = "Failed".to_string();
        row.clone()
    }

    /// Applies a parser event. Returns the touched row, if any.
    pub fn apply(&mut self, event: &ParseEvent) -> Option<PackageProgress> {
        match event {
            ParseEvent::Complete(name) => Some(self.complete(name)),
            ParseEvent::BeginActive { name, mode } => Some(self.begin(name, *mode)),
            ParseEvent::SetStatus {
                name,
                status,
                determinate,
            } => Some(self.set_status(name, status, *determinate)),
            ParseEvent::SetProgress {
                name,
                percent,
                status,
            } => Some(self.set_progress(name, *percent, status)),
            ParseEvent::LockContention | ParseEvent::PhaseHint(_) => None,
        }
    }

    pub fn rows(&self) -> &[PackageProgress] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.state == ProgressState::Complete)
            .count()
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let secs = secs % 60.0;
        format!("{}m {:.0}s", mins, secs)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours, mins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xup_core::parse_listing;
    use xup_pacman::parse;

    #[test]
    fn test_populate_keeps_order_and_skips_existing() {
        let mut table = ProgressTable::new();
        let added = table.populate(&parse_listing("b 1-1 -> 2-1\na 1-1 -> 2-1\nb 1-1 -> 2-1"));
        assert_eq!(added.len(), 2);
        let names: Vec<&str> = table.rows().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(table.rows().iter().all(|r| r.state == ProgressState::Waiting));
    }

    #[test]
    fn test_parser_events_drive_rows() {
        let mut table = ProgressTable::new();
        table.populate(&parse_listing("foo 1-1 -> 2-1\nbar 1-1 -> 2-1"));

        for event in parse("upgrading foo [###] 40%\nupgrading bar", None) {
            table.apply(&event);
        }

        assert_eq!(table.get("foo").unwrap().state, ProgressState::Complete);
        assert_eq!(
            table.get("bar").unwrap().state,
            ProgressState::Active {
                determinate: false,
                percent: 0
            }
        );
        assert_eq!(table.get("bar").unwrap().status_text, "Upgrading...");
        assert_eq!(table.completed(), 1);
    }

    #[test]
    fn test_rows_created_lazily() {
        let mut table = ProgressTable::new();
        let row = table.set_progress("dep", 70, "70%");
        assert_eq!(
            row.state,
            ProgressState::Active {
                determinate: true,
                percent: 70
            }
        );
        table.fail("dep");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("dep").unwrap().state, ProgressState::Failed);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }
}
