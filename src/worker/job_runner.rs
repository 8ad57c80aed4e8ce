use chrono::Local;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::job::{AppStatus, JobDir, JobError, Result, StatusEntry};

/// External program that executes a driver script.
///
/// The driver path is appended after `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Per-submission switches
#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    /// Redirect the worker's stderr into the output log as well as stdout.
    pub capture_stderr: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self { capture_stderr: true }
    }
}

/// Delivered once the COMPLETED entry for a run is durable
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub driver_path: PathBuf,
    /// `None` when the worker was terminated by a signal or could not be waited on.
    pub exit_code: Option<i32>,
    pub entry: StatusEntry,
}

/// A launched run
#[derive(Debug)]
pub struct Submission {
    /// The SUBMITTED ledger entry
    pub entry: StatusEntry,
    pub pid: Option<u32>,
    /// Resolves with the completion event. Dropping it does not affect the run.
    pub completion: oneshot::Receiver<CompletionEvent>,
}

/// Count of runs that have not recorded COMPLETED yet.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Held by a watcher for the lifetime of its run.
struct RunGuard(Arc<InFlight>);

impl RunGuard {
    fn enter(runs: &Arc<InFlight>) -> Self {
        runs.count.fetch_add(1, Ordering::AcqRel);
        Self(runs.clone())
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Launches worker processes and records their lifecycle in the job ledger.
///
/// # Lifecycle
/// 1. Validate the driver script and check its job is still UPLOADED
/// 2. Hand the run to a watcher task on the runner's runtime
/// 3. The watcher spawns the worker with stdout/stderr appended to `LOG.log`
/// 4. Once the process is confirmed running it appends SUBMITTED and
///    `submit` returns without waiting for the process
/// 5. On exit, whatever the exit code, the watcher appends COMPLETED
///
/// A launch failure writes nothing to the ledger, so a job is never left
/// claiming SUBMITTED for a process that never ran.
///
/// Watchers are detached tasks on the runtime the runner was created in.
/// Dropping the runner, or giving up on [`JobRunner::drain`], leaves them
/// running until their COMPLETED entry is written.
pub struct JobRunner {
    command: WorkerCommand,
    runtime: Option<Handle>,
    runs: Arc<InFlight>,
    // Serializes the UPLOADED check with the SUBMITTED append.
    submit_lock: Mutex<()>,
}

impl JobRunner {
    /// Create a new JobRunner instance
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            runtime: Handle::try_current().ok(),
            runs: Arc::new(InFlight::default()),
            submit_lock: Mutex::new(()),
        }
    }

    /// Launch `driver_path` and return as soon as the SUBMITTED entry is written.
    ///
    /// Only a job whose latest entry is UPLOADED can be submitted, so each
    /// upload runs at most once.
    pub async fn submit(&self, driver_path: &Path, options: SubmitOptions) -> Result<Submission> {
        let is_file = fs::metadata(driver_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            warn!("Rejected submit of {}: not a regular file", driver_path.display());
            return Err(JobError::InvalidDriver(driver_path.to_path_buf()));
        }

        let _submitting = self.submit_lock.lock().await;
        let dir = JobDir::of_driver(driver_path);
        let status = match dir.ledger().latest().await {
            Ok(entry) => Some(entry.app_status),
            Err(JobError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        if status != Some(AppStatus::Uploaded) {
            warn!(
                "Rejected submit of {}: job status is {:?}",
                driver_path.display(),
                status
            );
            return Err(JobError::InvalidTransition {
                path: dir.path().to_path_buf(),
                status,
            });
        }

        let (launched_tx, launched_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let watcher = run_job(
            self.command.clone(),
            driver_path.to_path_buf(),
            options,
            RunGuard::enter(&self.runs),
            launched_tx,
            done_tx,
        );
        match &self.runtime {
            Some(handle) => handle.spawn(watcher),
            None => tokio::spawn(watcher),
        };

        let (entry, pid) = launched_rx.await.map_err(|_| JobError::LaunchFailed {
            program: self.command.program.clone(),
            driver: driver_path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Interrupted, "runner stopped before launch"),
        })??;

        Ok(Submission {
            entry,
            pid,
            completion: done_rx,
        })
    }

    /// Number of runs whose completion has not been recorded yet
    pub fn in_flight(&self) -> usize {
        self.runs.count.load(Ordering::Acquire)
    }

    /// Wait until every launched run has recorded COMPLETED.
    ///
    /// Cancelling the returned future does not affect the runs.
    pub async fn drain(&self) {
        loop {
            let idle = self.runs.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Spawn the worker and record SUBMITTED.
///
/// If the ledger cannot be written the fresh child is killed again, so no
/// process runs without a ledger entry.
async fn launch(
    command: &WorkerCommand,
    driver_path: &Path,
    options: SubmitOptions,
) -> Result<(Child, StatusEntry)> {
    let dir = JobDir::of_driver(driver_path);
    // The worker runs inside the job directory, so hand it an absolute path.
    let driver_arg = fs::canonicalize(driver_path)
        .await
        .map_err(JobError::io(driver_path))?;

    let log_path = dir.log_path();
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
        .map_err(JobError::io(&log_path))?
        .into_std()
        .await;
    let stderr = if options.capture_stderr {
        Stdio::from(stdout.try_clone().map_err(JobError::io(&log_path))?)
    } else {
        Stdio::null()
    };

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .arg(&driver_arg)
        .current_dir(dir.path())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(stderr)
        .spawn()
        .map_err(|source| {
            error!(
                "Failed to launch {} for {}: {}",
                command.program,
                driver_path.display(),
                source
            );
            JobError::LaunchFailed {
                program: command.program.clone(),
                driver: driver_path.to_path_buf(),
                source,
            }
        })?;

    match dir.ledger().append(driver_path, AppStatus::Submitted, Local::now()).await {
        Ok(entry) => {
            info!(
                "Submitted {} (pid={:?}, command={})",
                driver_path.display(),
                child.id(),
                command.program
            );
            Ok((child, entry))
        }
        Err(e) => {
            error!(
                "Could not record submission of {}, stopping worker: {}",
                driver_path.display(),
                e
            );
            if let Err(kill_err) = child.kill().await {
                error!("Failed to stop worker for {}: {}", driver_path.display(), kill_err);
            }
            Err(e)
        }
    }
}

/// One execution slot: launch, report back, wait for exit, record COMPLETED.
async fn run_job(
    command: WorkerCommand,
    driver: PathBuf,
    options: SubmitOptions,
    run: RunGuard,
    launched: oneshot::Sender<Result<(StatusEntry, Option<u32>)>>,
    done: oneshot::Sender<CompletionEvent>,
) {
    let (mut child, entry) = match launch(&command, &driver, options).await {
        Ok(launched) => launched,
        Err(e) => {
            drop(run);
            let _ = launched.send(Err(e));
            return;
        }
    };
    let ledger = JobDir::of_driver(&driver).ledger();
    if launched.send(Ok((entry, child.id()))).is_err() {
        debug!("Submitter for {} went away, run continues", driver.display());
    }

    let exit_code = match child.wait().await {
        Ok(status) => {
            info!("Worker for {} exited: {}", driver.display(), status);
            status.code()
        }
        Err(e) => {
            error!("Failed to wait on worker for {}: {}", driver.display(), e);
            None
        }
    };

    let recorded = ledger.append(&driver, AppStatus::Completed, Local::now()).await;
    drop(run);
    match recorded {
        Ok(entry) => {
            info!("Completed {} (exit_code={:?})", driver.display(), exit_code);
            // The submitter may not be listening.
            let _ = done.send(CompletionEvent {
                driver_path: driver,
                exit_code,
                entry,
            });
        }
        Err(e) => error!("Failed to record completion of {}: {}", driver.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn sh_runner() -> JobRunner {
        JobRunner::new(WorkerCommand::new("sh", vec![]))
    }

    async fn uploaded_script(temp: &TempDir, body: &str) -> PathBuf {
        let dir = JobDir::new(temp.path().join("0000"));
        std::fs::create_dir_all(dir.path()).unwrap();
        let driver = dir.driver_path("job.sh");
        std::fs::write(&driver, body).unwrap();
        dir.ledger()
            .append(&driver, AppStatus::Uploaded, Local::now())
            .await
            .unwrap();
        driver
    }

    async fn wait_done(submission: Submission) -> CompletionEvent {
        timeout(Duration::from_secs(10), submission.completion)
            .await
            .expect("worker did not finish in time")
            .expect("completion was not recorded")
    }

    #[tokio::test]
    async fn test_submit_returns_before_worker_exits() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "sleep 2\n").await;
        let runner = sh_runner();

        let started = Instant::now();
        let submission = runner.submit(&driver, SubmitOptions::default()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(submission.entry.app_status, AppStatus::Submitted);
        let dir = JobDir::of_driver(&driver);
        assert_eq!(dir.ledger().latest().await.unwrap().app_status, AppStatus::Submitted);
        assert_eq!(runner.in_flight(), 1);

        let event = wait_done(submission).await;
        assert_eq!(event.exit_code, Some(0));
        assert_eq!(dir.ledger().latest().await.unwrap().app_status, AppStatus::Completed);
    }

    #[tokio::test]
    async fn test_failing_worker_still_completes() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "echo boom >&2\nexit 3\n").await;
        let runner = sh_runner();

        let submission = runner.submit(&driver, SubmitOptions::default()).await.unwrap();
        let event = wait_done(submission).await;

        assert_eq!(event.exit_code, Some(3));
        assert_eq!(event.driver_path, driver);
        assert_eq!(event.entry.app_status, AppStatus::Completed);

        let history = JobDir::of_driver(&driver).ledger().history().await.unwrap();
        let statuses: Vec<AppStatus> = history.iter().map(|e| e.app_status).collect();
        assert_eq!(
            statuses,
            vec![AppStatus::Uploaded, AppStatus::Submitted, AppStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_output_is_appended_to_log() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "echo out\necho err >&2\n").await;
        let dir = JobDir::of_driver(&driver);
        std::fs::write(dir.log_path(), "earlier run\n").unwrap();

        let submission = sh_runner().submit(&driver, SubmitOptions::default()).await.unwrap();
        wait_done(submission).await;

        let log = std::fs::read_to_string(dir.log_path()).unwrap();
        assert!(log.starts_with("earlier run\n"));
        assert!(log.contains("out\n"));
        assert!(log.contains("err\n"));
    }

    #[tokio::test]
    async fn test_stderr_can_be_discarded() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "echo out\necho err >&2\n").await;

        let options = SubmitOptions { capture_stderr: false };
        let submission = sh_runner().submit(&driver, options).await.unwrap();
        wait_done(submission).await;

        let log = std::fs::read_to_string(JobDir::of_driver(&driver).log_path()).unwrap();
        assert_eq!(log, "out\n");
    }

    #[tokio::test]
    async fn test_missing_driver_is_invalid() {
        let temp = TempDir::new().unwrap();
        let runner = sh_runner();

        let err = runner
            .submit(&temp.path().join("nope.sh"), SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidDriver(_)));

        let err = runner.submit(temp.path(), SubmitOptions::default()).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidDriver(_)));
        assert!(!temp.path().join("STATUS.log").exists());
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_ledger_untouched() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "echo hi\n").await;
        let runner = JobRunner::new(WorkerCommand::new("/nonexistent/spark-submit", vec![]));

        let err = runner.submit(&driver, SubmitOptions::default()).await.unwrap_err();
        assert!(matches!(err, JobError::LaunchFailed { .. }));

        let latest = JobDir::of_driver(&driver).ledger().latest().await.unwrap();
        assert_eq!(latest.app_status, AppStatus::Uploaded);
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_statuses_never_move_backwards() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "sleep 0.3\n").await;
        let ledger = JobDir::of_driver(&driver).ledger();
        let runner = sh_runner();

        let mut seen = vec![ledger.latest().await.unwrap().app_status];
        let mut submission = runner.submit(&driver, SubmitOptions::default()).await.unwrap();
        loop {
            seen.push(ledger.latest().await.unwrap().app_status);
            match submission.completion.try_recv() {
                Ok(_) => break,
                Err(oneshot::error::TryRecvError::Empty) => {
                    tokio::time::sleep(Duration::from_millis(20)).await
                }
                Err(e) => panic!("completion dropped: {e}"),
            }
        }
        seen.push(ledger.latest().await.unwrap().app_status);

        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.first(), Some(&AppStatus::Uploaded));
        assert_eq!(seen.last(), Some(&AppStatus::Completed));
    }

    #[tokio::test]
    async fn test_run_outlives_dropped_runner() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "sleep 0.2\n").await;
        let runner = sh_runner();

        let submission = runner.submit(&driver, SubmitOptions::default()).await.unwrap();
        drop(runner);

        let event = wait_done(submission).await;
        assert_eq!(event.exit_code, Some(0));
        let latest = JobDir::of_driver(&driver).ledger().latest().await.unwrap();
        assert_eq!(latest.app_status, AppStatus::Completed);
    }

    #[tokio::test]
    async fn test_abandoned_drain_leaves_runs_alone() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "sleep 0.3\n").await;
        let runner = sh_runner();

        let submission = runner.submit(&driver, SubmitOptions::default()).await.unwrap();
        assert!(timeout(Duration::from_millis(50), runner.drain()).await.is_err());
        assert_eq!(runner.in_flight(), 1);

        wait_done(submission).await;
        assert_eq!(runner.in_flight(), 0);
        let latest = JobDir::of_driver(&driver).ledger().latest().await.unwrap();
        assert_eq!(latest.app_status, AppStatus::Completed);
    }

    #[tokio::test]
    async fn test_completed_job_cannot_be_resubmitted() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "true\n").await;
        let runner = sh_runner();

        let submission = runner.submit(&driver, SubmitOptions::default()).await.unwrap();
        wait_done(submission).await;

        let err = runner.submit(&driver, SubmitOptions::default()).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition { status: Some(AppStatus::Completed), .. }
        ));

        let history = JobDir::of_driver(&driver).ledger().history().await.unwrap();
        let statuses: Vec<AppStatus> = history.iter().map(|e| e.app_status).collect();
        assert_eq!(
            statuses,
            vec![AppStatus::Uploaded, AppStatus::Submitted, AppStatus::Completed]
        );
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_script_without_upload_record_is_refused() {
        let temp = TempDir::new().unwrap();
        let driver = temp.path().join("job.sh");
        std::fs::write(&driver, "echo hi\n").unwrap();

        let err = sh_runner()
            .submit(&driver, SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { status: None, .. }));
        assert!(!temp.path().join("STATUS.log").exists());
        assert!(!temp.path().join("LOG.log").exists());
    }

    #[tokio::test]
    async fn test_concurrent_submits_launch_once() {
        let temp = TempDir::new().unwrap();
        let driver = uploaded_script(&temp, "sleep 0.2\n").await;
        let runner = sh_runner();

        let (a, b) = tokio::join!(
            runner.submit(&driver, SubmitOptions::default()),
            runner.submit(&driver, SubmitOptions::default())
        );
        let (launched, refused) = match (a, b) {
            (Ok(submission), Err(e)) | (Err(e), Ok(submission)) => (submission, e),
            (a, b) => panic!("expected exactly one launch, got {a:?} and {b:?}"),
        };
        assert!(matches!(
            refused,
            JobError::InvalidTransition { status: Some(AppStatus::Submitted), .. }
        ));

        wait_done(launched).await;
        let history = JobDir::of_driver(&driver).ledger().history().await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_drain_waits_for_all_runs() {
        let temp_a = TempDir::new().unwrap();
        let temp_b = TempDir::new().unwrap();
        let a = uploaded_script(&temp_a, "sleep 0.2\n").await;
        let b = uploaded_script(&temp_b, "exit 1\n").await;
        let runner = sh_runner();

        runner.submit(&a, SubmitOptions::default()).await.unwrap();
        runner.submit(&b, SubmitOptions::default()).await.unwrap();

        timeout(Duration::from_secs(10), runner.drain()).await.unwrap();

        assert_eq!(runner.in_flight(), 0);
        for driver in [&a, &b] {
            let latest = JobDir::of_driver(driver).ledger().latest().await.unwrap();
            assert_eq!(latest.app_status, AppStatus::Completed);
        }
    }
}
