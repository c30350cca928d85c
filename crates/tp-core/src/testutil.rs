use crate::error::{ClassifiedError, ErrorClass};
use crate::services::{Generator, Repository, Ticketing, TransitionMap, Workspace};
use crate::types::{CodeChange, Ticket, TicketKey};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub fn key(value: &str) -> TicketKey {
    TicketKey::new(value).unwrap()
}

pub fn ticket(value: &str, summary: &str) -> Ticket {
    Ticket::new(key(value), summary, "")
}

/// A failure that can be replayed on every call.
#[derive(Debug, Clone)]
struct Failure(ErrorClass, String);

impl Failure {
    fn from_error(err: &ClassifiedError) -> Self {
        Self(err.class(), err.to_string())
    }

    fn to_error(&self) -> ClassifiedError {
        ClassifiedError::new(self.0, self.1.clone())
    }
}

fn replay(slot: &Mutex<Option<Failure>>) -> Result<(), ClassifiedError> {
    match slot.lock().unwrap().as_ref() {
        Some(failure) => Err(failure.to_error()),
        None => Ok(()),
    }
}

#[derive(Default)]
pub struct FakeTicketing {
    tickets: Mutex<Vec<Ticket>>,
    fetch_failures: Mutex<VecDeque<ClassifiedError>>,
    fetch_calls: AtomicU32,
    status_failure: Mutex<Option<Failure>>,
    status_updates: Mutex<Vec<(String, String)>>,
}

impl FakeTicketing {
    pub fn new(tickets: Vec<Ticket>) -> Self {
        Self {
            tickets: Mutex::new(tickets),
            ..Self::default()
        }
    }

    /// Queued errors are returned by the next fetches, in order.
    pub fn fail_fetches(&self, errors: Vec<ClassifiedError>) {
        self.fetch_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_status_updates(&self, err: ClassifiedError) {
        *self.status_failure.lock().unwrap() = Some(Failure::from_error(&err));
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn status_updates(&self) -> Vec<(String, String)> {
        self.status_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ticketing for FakeTicketing {
    async fn fetch_tickets(
        &self,
        _assignee: &str,
        _project: &str,
    ) -> Result<Vec<Ticket>, ClassifiedError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.tickets.lock().unwrap().clone())
    }

    async fn update_status(
        &self,
        key: &TicketKey,
        status: &str,
        _transitions: &TransitionMap,
    ) -> Result<(), ClassifiedError> {
        replay(&self.status_failure)?;
        self.status_updates
            .lock()
            .unwrap()
            .push((key.to_string(), status.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRecord {
    pub base: String,
    pub head: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct RepoLog {
    pub clones: u32,
    pub switches: Vec<String>,
    pub syncs: u32,
    pub branches: Vec<String>,
    pub staged: Vec<String>,
    pub commits: Vec<String>,
    pub pushes: Vec<String>,
    pub pull_requests: Vec<PullRequestRecord>,
    pub released: u32,
}

#[derive(Default)]
struct RepoState {
    log: Mutex<RepoLog>,
    no_changes: AtomicBool,
}

pub struct FakeRepository {
    root: PathBuf,
    cloned: AtomicBool,
    state: Arc<RepoState>,
    clone_failure: Mutex<Option<Failure>>,
    switch_failure: Mutex<Option<Failure>>,
    sync_failure: Mutex<Option<Failure>>,
    branch_failure: Mutex<Option<Failure>>,
}

impl FakeRepository {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            cloned: AtomicBool::new(true),
            state: Arc::new(RepoState::default()),
            clone_failure: Mutex::new(None),
            switch_failure: Mutex::new(None),
            sync_failure: Mutex::new(None),
            branch_failure: Mutex::new(None),
        }
    }

    pub fn log(&self) -> RepoLog {
        self.state.log.lock().unwrap().clone()
    }

    pub fn workspace_root(&self, branch: &str) -> PathBuf {
        self.root.join("worktrees").join(branch.replace('/', "-"))
    }

    pub fn set_cloned(&self, cloned: bool) {
        self.cloned.store(cloned, Ordering::SeqCst);
    }

    pub fn report_no_changes(&self) {
        self.state.no_changes.store(true, Ordering::SeqCst);
    }

    pub fn fail_clone(&self, err: ClassifiedError) {
        *self.clone_failure.lock().unwrap() = Some(Failure::from_error(&err));
    }

    pub fn fail_switch(&self, err: ClassifiedError) {
        *self.switch_failure.lock().unwrap() = Some(Failure::from_error(&err));
    }

    pub fn fail_sync(&self, err: ClassifiedError) {
        *self.sync_failure.lock().unwrap() = Some(Failure::from_error(&err));
    }

    pub fn fail_create_branch(&self, err: ClassifiedError) {
        *self.branch_failure.lock().unwrap() = Some(Failure::from_error(&err));
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn is_cloned(&self) -> bool {
        self.cloned.load(Ordering::SeqCst)
    }

    async fn clone_repository(&self) -> Result<(), ClassifiedError> {
        self.state.log.lock().unwrap().clones += 1;
        replay(&self.clone_failure)?;
        self.cloned.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn switch_branch(&self, branch: &str) -> Result<(), ClassifiedError> {
        self.state
            .log
            .lock()
            .unwrap()
            .switches
            .push(branch.to_string());
        replay(&self.switch_failure)
    }

    async fn sync_with_remote(&self) -> Result<(), ClassifiedError> {
        self.state.log.lock().unwrap().syncs += 1;
        replay(&self.sync_failure)
    }

    async fn create_branch(
        &self,
        branch: &str,
        _base: &str,
    ) -> Result<Box<dyn Workspace>, ClassifiedError> {
        replay(&self.branch_failure)?;
        let root = self.workspace_root(branch);
        std::fs::create_dir_all(&root).map_err(ClassifiedError::permanent)?;
        self.state
            .log
            .lock()
            .unwrap()
            .branches
            .push(branch.to_string());
        Ok(Box::new(FakeWorkspace {
            root,
            branch: branch.to_string(),
            state: Arc::clone(&self.state),
            released: AtomicBool::new(false),
        }))
    }

    async fn create_pull_request(
        &self,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<String, ClassifiedError> {
        let mut log = self.state.log.lock().unwrap();
        log.pull_requests.push(PullRequestRecord {
            base: base.to_string(),
            head: head.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(format!("https://example.test/pr/{}", log.pull_requests.len()))
    }
}

pub struct FakeWorkspace {
    root: PathBuf,
    branch: String,
    state: Arc<RepoState>,
    released: AtomicBool,
}

#[async_trait]
impl Workspace for FakeWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    async fn add_file(&self, path: &str) -> Result<(), ClassifiedError> {
        self.state
            .log
            .lock()
            .unwrap()
            .staged
            .push(path.to_string());
        Ok(())
    }

    async fn has_local_changes(&self) -> Result<bool, ClassifiedError> {
        if self.state.no_changes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(!self.state.log.lock().unwrap().staged.is_empty())
    }

    async fn commit(&self, message: &str) -> Result<(), ClassifiedError> {
        self.state
            .log
            .lock()
            .unwrap()
            .commits
            .push(message.to_string());
        Ok(())
    }

    async fn push(&self) -> Result<(), ClassifiedError> {
        self.state
            .log
            .lock()
            .unwrap()
            .pushes
            .push(self.branch.clone());
        Ok(())
    }

    async fn release(&self) -> Result<(), ClassifiedError> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.state.log.lock().unwrap().released += 1;
        }
        Ok(())
    }
}

pub struct FakeGenerator {
    script: Mutex<VecDeque<Result<Vec<CodeChange>, ClassifiedError>>>,
    fallback: Vec<CodeChange>,
    calls: AtomicU32,
}

impl FakeGenerator {
    pub fn always(changes: Vec<CodeChange>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: changes,
            calls: AtomicU32::new(0),
        }
    }

    /// Replays `script` in order, then keeps returning the last success.
    pub fn scripted(script: Vec<Result<Vec<CodeChange>, ClassifiedError>>) -> Self {
        let fallback = script
            .iter()
            .rev()
            .find_map(|entry| entry.as_ref().ok().cloned())
            .unwrap_or_default();
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn plan_changes(
        &self,
        _ticket: &Ticket,
        _repo_context: &str,
    ) -> Result<Vec<CodeChange>, ClassifiedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(entry) => entry,
            None => Ok(self.fallback.clone()),
        }
    }
}
