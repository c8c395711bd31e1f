//! Recording fakes of the GitHub seams.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hookmirror_core::{CheckRunConclusion, CheckRunDescriptor, CheckRunStatus};
use tokio::sync::Notify;
use tracing::subscriber::DefaultGuard;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

use super::api::{AppApi, CheckRunId, ChecksApi, SuiteId};
use crate::error::ChecksApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSuite {
        sha: String,
        branch: String,
    },
    CreateRun {
        external_id: String,
        status: CheckRunStatus,
        conclusion: Option<CheckRunConclusion>,
    },
    UpdateRun {
        run_id: CheckRunId,
        status: CheckRunStatus,
        conclusion: Option<CheckRunConclusion>,
    },
}

#[derive(Default)]
pub struct FakeChecks {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    rejected_shas: Mutex<HashSet<String>>,
    fail_suites: AtomicBool,
    fail_runs: AtomicBool,
    new_id_on_update: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeChecks {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(100),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn suite_creations(&self, sha: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::CreateSuite { sha: s, .. } if s == sha))
            .count()
    }

    /// Answer 422 to suite creation for `sha`.
    pub fn reject_suite(&self, sha: &str) {
        self.rejected_shas.lock().unwrap().insert(sha.to_string());
    }

    pub fn fail_suites(&self, fail: bool) {
        self.fail_suites.store(fail, Ordering::SeqCst);
    }

    pub fn fail_runs(&self, fail: bool) {
        self.fail_runs.store(fail, Ordering::SeqCst);
    }

    /// Make updates answer with a fresh run ID instead of echoing the input.
    pub fn new_id_on_update(&self, enabled: bool) {
        self.new_id_on_update.store(enabled, Ordering::SeqCst);
    }

    /// Sleep inside every call, widening race windows.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn server_error() -> ChecksApiError {
    ChecksApiError::Status {
        status: 502,
        body: "bad gateway".to_string(),
    }
}

#[async_trait]
impl ChecksApi for FakeChecks {
    async fn create_check_suite(
        &self,
        _owner: &str,
        _name: &str,
        head_sha: &str,
        head_branch: &str,
    ) -> Result<SuiteId, ChecksApiError> {
        self.record(Call::CreateSuite {
            sha: head_sha.to_string(),
            branch: head_branch.to_string(),
        });
        self.pause().await;

        if self.rejected_shas.lock().unwrap().contains(head_sha) {
            return Err(ChecksApiError::Unprocessable(
                "check suite already exists".to_string(),
            ));
        }
        if self.fail_suites.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(SuiteId(self.next_id()))
    }

    async fn create_check_run(
        &self,
        _owner: &str,
        _name: &str,
        run: &CheckRunDescriptor,
    ) -> Result<CheckRunId, ChecksApiError> {
        self.record(Call::CreateRun {
            external_id: run.external_id.clone(),
            status: run.status,
            conclusion: run.conclusion,
        });
        self.pause().await;

        if self.fail_runs.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(CheckRunId(self.next_id()))
    }

    async fn update_check_run(
        &self,
        _owner: &str,
        _name: &str,
        run_id: CheckRunId,
        run: &CheckRunDescriptor,
    ) -> Result<CheckRunId, ChecksApiError> {
        self.record(Call::UpdateRun {
            run_id,
            status: run.status,
            conclusion: run.conclusion,
        });
        self.pause().await;

        if self.fail_runs.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        if self.new_id_on_update.load(Ordering::SeqCst) {
            return Ok(CheckRunId(self.next_id()));
        }
        Ok(run_id)
    }
}

pub struct FakeApp {
    installation: Option<u64>,
    pub checks: Arc<FakeChecks>,
    lookups: AtomicUsize,
    clients_built: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl FakeApp {
    pub fn with_installation(id: u64) -> Self {
        Self {
            installation: Some(id),
            checks: Arc::new(FakeChecks::new()),
            lookups: AtomicUsize::new(0),
            clients_built: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Lookups block until the returned handle is notified.
    pub fn gated(id: u64) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let app = Self {
            gate: Some(gate.clone()),
            ..Self::with_installation(id)
        };
        (app, gate)
    }

    pub fn failing() -> Self {
        Self {
            installation: None,
            ..Self::with_installation(0)
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn clients_built(&self) -> usize {
        self.clients_built.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppApi for FakeApp {
    async fn find_repository_installation(
        &self,
        _owner: &str,
        _name: &str,
    ) -> Result<u64, ChecksApiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        // Let concurrent callers pile up behind the record's resolution mutex.
        tokio::task::yield_now().await;
        self.installation.ok_or_else(|| ChecksApiError::Status {
            status: 404,
            body: "Not Found".to_string(),
        })
    }

    fn installation_client(&self, _installation_id: u64) -> Arc<dyn ChecksApi> {
        self.clients_built.fetch_add(1, Ordering::SeqCst);
        self.checks.clone()
    }
}

/// Formatted log output of the current thread, captured while the guard lives.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

pub struct LogWriter(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
