//! Runs one external tool at a time and streams what it prints.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};
use xup_core::{
    Error, Invocation, OutputStream, ProcessErrorKind, Result, StageCallback, StageEvent,
    StageLauncher, StageResult,
};

const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct ProcessStageRunner {
    active: Arc<AtomicBool>,
}

impl ProcessStageRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&self, invocation: &Invocation) -> Result<()> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(
                "Refusing to start {} while another process is running",
                invocation.display_name()
            );
            return Err(Error::StageBusy(invocation.display_name()));
        }
        Ok(())
    }
}

impl StageLauncher for ProcessStageRunner {
    fn start(&self, invocation: Invocation, events: StageCallback) -> Result<()> {
        self.claim(&invocation)?;
        info!("Starting {}", invocation.display_name());

        let active = self.active.clone();
        tokio::spawn(async move {
            let last = run_streamed(&invocation, &events).await;
            // free the slot first so the next stage can launch from the final event
            active.store(false, Ordering::SeqCst);
            events(last);
        });
        Ok(())
    }

    fn run_detached(
        &self,
        invocation: Invocation,
        timeout: Duration,
        events: StageCallback,
    ) -> Result<()> {
        self.claim(&invocation)?;
        info!("Running {} (detached)", invocation.display_name());

        let active = self.active.clone();
        tokio::spawn(async move {
            let result = run_inherited(&invocation, timeout).await;
            active.store(false, Ordering::SeqCst);
            events(StageEvent::DetachedFinished(result));
        });
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

async fn pump<R>(
    reader: Option<R>,
    stream: OutputStream,
    events: &StageCallback,
) -> std::result::Result<(), ProcessErrorKind>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => events(StageEvent::Output {
                stream,
                text: String::from_utf8_lossy(&buf[..n]).into_owned(),
            }),
            Err(e) => {
                warn!("Failed reading {:?}: {}", stream, e);
                return Err(ProcessErrorKind::ReadError);
            }
        }
    }
}

/// Returns the event that ends the invocation.
async fn run_streamed(invocation: &Invocation, events: &StageCallback) -> StageEvent {
    let mut child = match Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to start {}: {}", invocation.display_name(), e);
            return StageEvent::ProcessError(ProcessErrorKind::from_io(&e));
        }
    };

    events(StageEvent::Started);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let finished = async {
        let (out, err) = tokio::join!(
            pump(stdout, OutputStream::Stdout, events),
            pump(stderr, OutputStream::Stderr, events)
        );
        let status = child.wait().await;
        (out.and(err), status)
    };

    let outcome = match invocation.timeout {
        Some(limit) => tokio::time::timeout(limit, finished).await.ok(),
        None => Some(finished.await),
    };

    let Some((read, status)) = outcome else {
        warn!("{} timed out, killing it", invocation.display_name());
        let _ = child.kill().await;
        return StageEvent::ProcessError(ProcessErrorKind::TimedOut);
    };

    if let Err(kind) = read {
        return StageEvent::ProcessError(kind);
    }

    match status {
        Ok(status) => match status.code() {
            Some(code) => {
                debug!("{} exited with {}", invocation.tool_name(), code);
                StageEvent::Finished(StageResult::exited(code))
            }
            None => {
                warn!("{} was killed by a signal", invocation.tool_name());
                StageEvent::Finished(StageResult::crashed())
            }
        },
        Err(e) => {
            warn!("Failed waiting for {}: {}", invocation.tool_name(), e);
            StageEvent::ProcessError(ProcessErrorKind::ReadError)
        }
    }
}

async fn run_inherited(
    invocation: &Invocation,
    limit: Duration,
) -> std::result::Result<i32, String> {
    let tool = invocation.tool_name();
    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to launch {}: {}", tool, e))?;

    let waited = tokio::time::timeout(limit, child.wait()).await;
    match waited {
        Ok(Ok(status)) => status
            .code()
            .ok_or_else(|| format!("{} was killed by a signal", tool)),
        Ok(Err(e)) => Err(format!("Failed waiting for {}: {}", tool, e)),
        Err(_) => {
            let _ = child.kill().await;
            Err(format!("{} timed out after {}s", tool, limit.as_secs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").args(["-c", script])
    }

    fn collector() -> (StageCallback, mpsc::UnboundedReceiver<StageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: StageCallback = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (callback, rx)
    }

    // collects until the terminal event
    async fn run_to_end(runner: &ProcessStageRunner, invocation: Invocation) -> Vec<StageEvent> {
        let (callback, mut rx) = collector();
        runner.start(invocation, callback).unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let last = matches!(
                event,
                StageEvent::Finished(_) | StageEvent::ProcessError(_)
            );
            events.push(event);
            if last {
                break;
            }
        }
        events
    }

    fn stdout_text(events: &[StageEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StageEvent::Output {
                    stream: OutputStream::Stdout,
                    text,
                } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_streams_output_then_exit_code() {
        let runner = ProcessStageRunner::new();
        let events = run_to_end(&runner, sh("echo one; echo two; echo oops >&2; exit 3")).await;

        assert_eq!(events.first(), Some(&StageEvent::Started));
        assert_eq!(
            events.last(),
            Some(&StageEvent::Finished(StageResult::exited(3)))
        );
        assert_eq!(stdout_text(&events), "one\ntwo\n");
        assert!(events.contains(&StageEvent::Output {
            stream: OutputStream::Stderr,
            text: "oops\n".into()
        }));
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn test_signal_exit_is_crash() {
        let runner = ProcessStageRunner::new();
        let events = run_to_end(&runner, sh("kill -9 $$")).await;
        assert_eq!(
            events.last(),
            Some(&StageEvent::Finished(StageResult::crashed()))
        );
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let runner = ProcessStageRunner::new();
        let events = run_to_end(&runner, Invocation::new("/nonexistent/checkupdates")).await;
        assert_eq!(
            events,
            vec![StageEvent::ProcessError(ProcessErrorKind::ExecutableMissing)]
        );
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn test_invocation_timeout() {
        let runner = ProcessStageRunner::new();
        let events = run_to_end(
            &runner,
            sh("exec sleep 5").with_timeout(Duration::from_millis(100)),
        )
        .await;
        assert_eq!(
            events.last(),
            Some(&StageEvent::ProcessError(ProcessErrorKind::TimedOut))
        );
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_busy() {
        let runner = ProcessStageRunner::new();
        let (callback, mut rx) = collector();
        runner.start(sh("sleep 0.3"), callback.clone()).unwrap();
        assert!(runner.is_busy());

        match runner.start(sh("true"), callback) {
            Err(Error::StageBusy(name)) => assert_eq!(name, "sh -c true"),
            other => panic!("expected busy rejection, got {:?}", other),
        }

        while let Some(event) = rx.recv().await {
            if let StageEvent::Finished(result) = event {
                assert!(result.is_success());
                break;
            }
        }
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn test_run_detached_reports_exit_code() {
        let runner = ProcessStageRunner::new();
        let (callback, mut rx) = collector();
        runner
            .run_detached(sh("exit 4"), Duration::from_secs(5), callback)
            .unwrap();
        assert_eq!(rx.recv().await, Some(StageEvent::DetachedFinished(Ok(4))));
        assert!(!runner.is_busy());

        let (callback, mut rx) = collector();
        runner
            .run_detached(sh("exec sleep 5"), Duration::from_millis(100), callback)
            .unwrap();
        match rx.recv().await {
            Some(StageEvent::DetachedFinished(Err(msg))) => assert!(msg.contains("timed out")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
