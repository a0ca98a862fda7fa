use tokio::process::Command;
use tracing::debug;
use xup_core::{Notifier, Urgency};

/// Desktop notifications through `notify-send`. Failures are only logged.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
    app_name: String,
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self {
            program: "notify-send".to_string(),
            app_name: "Arch Update".to_string(),
        }
    }
}

impl DesktopNotifier {
    fn args(&self, urgency: Urgency, body: &str) -> Vec<String> {
        let mut args = Vec::new();
        if urgency == Urgency::Critical {
            args.push("-u".to_string());
            args.push("critical".to_string());
        }
        args.push(self.app_name.clone());
        args.push(body.to_string());
        args
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, urgency: Urgency, body: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime, dropping notification: {}", body);
            return;
        };

        let program = self.program.clone();
        let args = self.args(urgency, body);
        runtime.spawn(async move {
            match Command::new(&program).args(&args).status().await {
                Ok(status) if !status.success() => debug!("{} exited with {}", program, status),
                Ok(_) => {}
                Err(e) => debug!("Notification failed: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let notifier = DesktopNotifier::default();
        assert_eq!(
            notifier.args(Urgency::Normal, "System updated"),
            vec!["Arch Update", "System updated"]
        );
        assert_eq!(
            notifier.args(Urgency::Critical, "Update failed"),
            vec!["-u", "critical", "Arch Update", "Update failed"]
        );
    }

    #[test]
    fn test_notify_outside_runtime_is_silent() {
        DesktopNotifier::default().notify(Urgency::Normal, "nobody listening");
    }
}
