//! Test support utilities shared across unit and integration tests.
//!
//! Everything here is an in-memory double for one of the crate's seams:
//! [`ScriptedRunner`] for [`CommandRunner`], [`FakeProvider`] for
//! [`ComputeProvider`] and [`ScriptedStatusSource`] for [`PrStatusSource`].
//! Doubles are cheap to clone and clones share state, so a test can keep a
//! handle for assertions after moving one into the code under test.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::provider::{
    ComputeProvider, InstanceDescriptor, InstanceQuery, InstanceStateName, LaunchRequest,
    NAME_TAG, PREVIEW_TAG_KEY, PREVIEW_TAG_VALUE, ProviderFuture,
};
use crate::remote::{CommandOutput, CommandRunner, RemoteError, RunnerFuture};
use crate::sweep::{PrStatus, PrStatusSource, StatusError, StatusFuture};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the final argument, which for `ssh` is the remote command.
    #[must_use]
    pub fn last_arg(&self) -> Option<String> {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        locked(&self.invocations).clone()
    }

    /// Number of responses still queued.
    #[must_use]
    pub fn pending_responses(&self) -> usize {
        locked(&self.responses).len()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        locked(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a> {
        locked(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let next = locked(&self.responses).pop_front();
        Box::pin(async move {
            next.ok_or_else(|| RemoteError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

/// Failures injected by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeProviderError {
    /// Describe was configured to fail.
    #[error("simulated describe failure")]
    Describe,
    /// Create was configured to fail.
    #[error("simulated create failure")]
    Create,
    /// Terminate was configured to fail for a batch containing `0`.
    #[error("simulated terminate failure for {0}")]
    Terminate(String),
    /// Terminate targeted `0` after it had already been terminated.
    #[error("instance {0} is already terminating")]
    AlreadyTerminated(String),
}

#[derive(Debug, Default)]
struct FakeProviderState {
    instances: Vec<InstanceDescriptor>,
    run_requests: Vec<LaunchRequest>,
    describe_calls: usize,
    terminate_calls: Vec<Vec<String>>,
    fail_describe: bool,
    fail_create: bool,
    omit_descriptor: bool,
    start_pending: bool,
    yield_on_create: bool,
    terminate_in_order: bool,
    fail_terminate: BTreeSet<String>,
    next_id: u32,
}

/// In-memory compute provider.
///
/// Created instances start `running` with a documentation-range address
/// unless [`FakeProvider::start_pending`] was called.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeProviderState>>,
}

impl FakeProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a descriptor as-is.
    pub fn insert(&self, descriptor: InstanceDescriptor) {
        locked(&self.state).instances.push(descriptor);
    }

    /// Inserts a running preview instance.
    pub fn insert_running(&self, id: &str, name: &str, address: Option<&str>) {
        self.insert(preview_descriptor(id, name, address, InstanceStateName::Running));
    }

    /// Inserts a stopped preview instance.
    pub fn insert_stopped(&self, id: &str, name: &str) {
        self.insert(preview_descriptor(id, name, None, InstanceStateName::Stopped));
    }

    /// Inserts a running instance without the preview marker tag.
    pub fn insert_unmarked(&self, id: &str, name: &str) {
        let mut descriptor = preview_descriptor(id, name, None, InstanceStateName::Running);
        descriptor.tags.remove(PREVIEW_TAG_KEY);
        self.insert(descriptor);
    }

    /// Sets the launch time of instance `id`.
    pub fn set_launched_at(&self, id: &str, launched_at: DateTime<Utc>) {
        self.update(id, |descriptor| descriptor.launched_at = Some(launched_at));
    }

    /// Marks instance `id` running at `address`.
    pub fn mark_running(&self, id: &str, address: &str) {
        self.update(id, |descriptor| {
            descriptor.state = InstanceStateName::Running;
            descriptor.public_address = Some(address.to_owned());
        });
    }

    /// Makes every describe call fail.
    pub fn fail_describe(&self) {
        locked(&self.state).fail_describe = true;
    }

    /// Makes every create call fail.
    pub fn fail_create(&self) {
        locked(&self.state).fail_create = true;
    }

    /// Makes create calls succeed without returning a descriptor.
    pub fn omit_descriptor_on_create(&self) {
        locked(&self.state).omit_descriptor = true;
    }

    /// Created instances start `pending` without an address.
    pub fn start_pending(&self) {
        locked(&self.state).start_pending = true;
    }

    /// Fails any terminate batch containing `id`.
    pub fn fail_terminate_for(&self, id: &str) {
        locked(&self.state).fail_terminate.insert(id.to_owned());
    }

    /// Create calls yield to the scheduler before recording the instance,
    /// giving concurrent launches a chance to interleave.
    pub fn yield_on_create(&self) {
        locked(&self.state).yield_on_create = true;
    }

    /// Terminate batches are applied one id at a time and stop at the first
    /// failure, leaving earlier ids terminated. Terminating an instance that
    /// is already gone fails.
    pub fn terminate_in_order(&self) {
        locked(&self.state).terminate_in_order = true;
    }

    /// Create requests received so far.
    #[must_use]
    pub fn run_requests(&self) -> Vec<LaunchRequest> {
        locked(&self.state).run_requests.clone()
    }

    /// Number of describe calls received.
    #[must_use]
    pub fn describe_calls(&self) -> usize {
        locked(&self.state).describe_calls
    }

    /// Terminate batches received so far, including failed ones.
    #[must_use]
    pub fn terminate_calls(&self) -> Vec<Vec<String>> {
        locked(&self.state).terminate_calls.clone()
    }

    /// Identifiers of running instances tagged with `name`.
    #[must_use]
    pub fn running_ids_named(&self, name: &str) -> Vec<String> {
        let query = InstanceQuery::running_named(name);
        locked(&self.state)
            .instances
            .iter()
            .filter(|descriptor| query.matches(descriptor))
            .map(|descriptor| descriptor.id.clone())
            .collect()
    }

    /// Identifiers of running or pending instances tagged with `name`.
    #[must_use]
    pub fn live_ids_named(&self, name: &str) -> Vec<String> {
        let query = InstanceQuery::live_named(name);
        locked(&self.state)
            .instances
            .iter()
            .filter(|descriptor| query.matches(descriptor))
            .map(|descriptor| descriptor.id.clone())
            .collect()
    }

    /// Current state of instance `id`.
    #[must_use]
    pub fn state_of(&self, id: &str) -> Option<InstanceStateName> {
        locked(&self.state)
            .instances
            .iter()
            .find(|descriptor| descriptor.id == id)
            .map(|descriptor| descriptor.state.clone())
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut InstanceDescriptor)) {
        let mut state = locked(&self.state);
        if let Some(descriptor) = state.instances.iter_mut().find(|d| d.id == id) {
            apply(descriptor);
        }
    }

    fn create(&self, request: &LaunchRequest) -> Result<Option<InstanceDescriptor>, FakeProviderError> {
        let mut state = locked(&self.state);
        state.run_requests.push(request.clone());
        if state.fail_create {
            return Err(FakeProviderError::Create);
        }
        if state.omit_descriptor {
            return Ok(None);
        }
        state.next_id += 1;
        let serial = state.next_id;
        let (status, address) = if state.start_pending {
            (InstanceStateName::Pending, None)
        } else {
            (
                InstanceStateName::Running,
                Some(format!("203.0.113.{serial}")),
            )
        };
        let descriptor = InstanceDescriptor {
            id: format!("i-fake-{serial}"),
            public_address: address,
            tags: request.tags.clone(),
            state: status,
            launched_at: Some(Utc::now()),
        };
        state.instances.push(descriptor.clone());
        Ok(Some(descriptor))
    }

    fn describe(&self, query: &InstanceQuery) -> Result<Vec<InstanceDescriptor>, FakeProviderError> {
        let mut state = locked(&self.state);
        state.describe_calls += 1;
        if state.fail_describe {
            return Err(FakeProviderError::Describe);
        }
        Ok(state
            .instances
            .iter()
            .filter(|descriptor| query.matches(descriptor))
            .cloned()
            .collect())
    }

    fn terminate(&self, ids: &[String]) -> Result<(), FakeProviderError> {
        let mut state = locked(&self.state);
        state.terminate_calls.push(ids.to_vec());
        if state.terminate_in_order {
            return ids.iter().try_for_each(|id| state.terminate_one(id));
        }
        if let Some(failing) = ids.iter().find(|id| state.fail_terminate.contains(*id)) {
            return Err(FakeProviderError::Terminate(failing.clone()));
        }
        for descriptor in &mut state.instances {
            if ids.contains(&descriptor.id) {
                descriptor.state = InstanceStateName::Terminated;
                descriptor.public_address = None;
            }
        }
        Ok(())
    }
}

impl FakeProviderState {
    fn terminate_one(&mut self, id: &str) -> Result<(), FakeProviderError> {
        if self.fail_terminate.contains(id) {
            return Err(FakeProviderError::Terminate(id.to_owned()));
        }
        let Some(descriptor) = self.instances.iter_mut().find(|d| d.id == id) else {
            return Ok(());
        };
        if descriptor.state == InstanceStateName::Terminated {
            return Err(FakeProviderError::AlreadyTerminated(id.to_owned()));
        }
        descriptor.state = InstanceStateName::Terminated;
        descriptor.public_address = None;
        Ok(())
    }
}

impl ComputeProvider for FakeProvider {
    type Error = FakeProviderError;

    fn run_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> ProviderFuture<'a, Option<InstanceDescriptor>, Self::Error> {
        Box::pin(async move {
            let yielding = locked(&self.state).yield_on_create;
            if yielding {
                tokio::task::yield_now().await;
            }
            self.create(request)
        })
    }

    fn describe_instances<'a>(
        &'a self,
        query: &'a InstanceQuery,
    ) -> ProviderFuture<'a, Vec<InstanceDescriptor>, Self::Error> {
        Box::pin(async move { self.describe(query) })
    }

    fn terminate_instances<'a>(&'a self, ids: &'a [String]) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.terminate(ids) })
    }
}

/// Builds a descriptor carrying the name and preview marker tags.
#[must_use]
pub fn preview_descriptor(
    id: &str,
    name: &str,
    address: Option<&str>,
    state: InstanceStateName,
) -> InstanceDescriptor {
    let mut tags = BTreeMap::new();
    tags.insert(NAME_TAG.to_owned(), name.to_owned());
    tags.insert(PREVIEW_TAG_KEY.to_owned(), PREVIEW_TAG_VALUE.to_owned());
    InstanceDescriptor {
        id: id.to_owned(),
        public_address: address.map(str::to_owned),
        tags,
        state,
        launched_at: None,
    }
}

/// PR-status source answering from a fixed table.
///
/// Numbers without an entry fail with [`StatusError::Request`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedStatusSource {
    answers: Arc<Mutex<HashMap<u64, Result<PrStatus, StatusError>>>>,
    queried: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedStatusSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `number` with `status`.
    #[must_use]
    pub fn with_status(self, number: u64, status: PrStatus) -> Self {
        locked(&self.answers).insert(number, Ok(status));
        self
    }

    /// Answers `number` with `error`.
    #[must_use]
    pub fn with_error(self, number: u64, error: StatusError) -> Self {
        locked(&self.answers).insert(number, Err(error));
        self
    }

    /// PR numbers queried so far, in order.
    #[must_use]
    pub fn queried(&self) -> Vec<u64> {
        locked(&self.queried).clone()
    }
}

impl PrStatusSource for ScriptedStatusSource {
    fn status(&self, number: u64) -> StatusFuture<'_> {
        locked(&self.queried).push(number);
        let answer = locked(&self.answers).get(&number).cloned();
        Box::pin(async move {
            answer.unwrap_or_else(|| {
                Err(StatusError::Request {
                    number,
                    message: String::from("no scripted status"),
                })
            })
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
