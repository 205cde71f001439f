//! In-memory fakes for every port the pipeline touches.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nodes::{ModelGateway, ModificationPipeline, PipelineContext, PipelineSettings};
use pipeline::dispatch::{DispatchError, DispatchTask, TaskQueue};
use pipeline::git::{CommitOutcome, GitError, GitOperations};
use pipeline::github::{HostedRepository, NewPullRequest, PullRequest, VcsError, VersionControlHost};
use pipeline::llm::{ChatRequest, LanguageModel, LlmError};
use pipeline::store::{KeyValueStore, StoreError, StoredItem};
use pipeline::{
    BranchName, ChangeRequest, GitHubLogin, ManualClock, ProgressRecord, ProgressTracker,
    PullRequestNumber, RepositoryRef, Stage, Timestamp,
};
use store::MemoryStore;
use tempfile::TempDir;

pub const START: i64 = 1_700_000_000;
pub const BOT: &str = "auto-pr-bot";

pub fn request(prompt: &str) -> ChangeRequest {
    ChangeRequest::from_json(
        serde_json::json!({
            "repositoryUrl": "https://github.com/acme/widgets",
            "modificationPrompt": prompt,
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap()
}

pub fn request_with_collaborator(prompt: &str, user: &str) -> ChangeRequest {
    ChangeRequest::from_json(
        serde_json::json!({
            "repositoryUrl": "https://github.com/acme/widgets",
            "modificationPrompt": prompt,
            "githubUsername": user,
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap()
}

pub fn open_pr(number: u64, head: &str) -> PullRequest {
    PullRequest {
        number: PullRequestNumber::new(number),
        html_url: format!("https://github.com/acme/widgets/pull/{number}"),
        head_ref: BranchName::new(head).unwrap(),
    }
}

// ---------------------------------------------------------------------------
// Version-control host
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeHost {
    pub calls: Mutex<Vec<String>>,
    pub existing: Mutex<Vec<PullRequest>>,
    pub created: Mutex<Vec<NewPullRequest>>,
    pub fail_fork: bool,
    pub fail_collaborator: bool,
    pub next_number: AtomicU64,
}

impl FakeHost {
    pub fn with_existing(prs: Vec<PullRequest>) -> Self {
        Self {
            existing: Mutex::new(prs),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VersionControlHost for FakeHost {
    async fn authenticated_user(&self) -> Result<GitHubLogin, VcsError> {
        self.log("user".into());
        Ok(GitHubLogin::new(BOT).unwrap())
    }

    async fn fork_repository(&self, upstream: &RepositoryRef) -> Result<HostedRepository, VcsError> {
        self.log(format!("fork {upstream}"));
        if self.fail_fork {
            return Err(VcsError::Api {
                operation: "fork repository".into(),
                status: 403,
                message: "Resource not accessible by integration".into(),
            });
        }
        Ok(HostedRepository {
            repository: RepositoryRef {
                owner: BOT.into(),
                name: upstream.name.clone(),
            },
            html_url: format!("https://github.com/{BOT}/{}", upstream.name),
            clone_url: format!("https://github.com/{BOT}/{}.git", upstream.name),
            is_fork: true,
        })
    }

    async fn default_branch(&self, repository: &RepositoryRef) -> Result<BranchName, VcsError> {
        self.log(format!("default_branch {repository}"));
        Ok(BranchName::new("main").unwrap())
    }

    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequest, VcsError> {
        self.log(format!("create_pr {}:{}", request.head_owner, request.head));
        self.created.lock().unwrap().push(request.clone());
        let number = 100 + self.next_number.fetch_add(1, Ordering::SeqCst);
        Ok(PullRequest {
            number: PullRequestNumber::new(number),
            html_url: format!("https://github.com/acme/widgets/pull/{number}"),
            head_ref: request.head.clone(),
        })
    }

    async fn list_open_pull_requests(
        &self,
        repository: &RepositoryRef,
        head_owner: &GitHubLogin,
        head: &BranchName,
    ) -> Result<Vec<PullRequest>, VcsError> {
        self.log(format!("list {repository} {head_owner}:{head}"));
        Ok(self.existing.lock().unwrap().clone())
    }

    async fn close_pull_request(
        &self,
        _repository: &RepositoryRef,
        number: PullRequestNumber,
        comment: &str,
    ) -> Result<(), VcsError> {
        assert!(!comment.is_empty());
        self.log(format!("close #{number}"));
        Ok(())
    }

    async fn delete_branch(&self, repository: &RepositoryRef, branch: &BranchName) -> Result<(), VcsError> {
        self.log(format!("delete_branch {repository} {branch}"));
        Ok(())
    }

    async fn add_collaborator(&self, repository: &RepositoryRef, user: &GitHubLogin) -> Result<(), VcsError> {
        self.log(format!("add_collaborator {repository} {user}"));
        if self.fail_collaborator {
            return Err(VcsError::Api {
                operation: "add collaborator".into(),
                status: 422,
                message: "Validation Failed".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Materialises `seed` on clone and reports `NoChanges` when the checkout
/// still matches it at commit time.
#[derive(Default)]
pub struct FakeGit {
    pub seed: BTreeMap<String, String>,
    pub calls: Mutex<Vec<String>>,
    pub committed: Mutex<Option<BTreeMap<String, String>>>,
}

impl FakeGit {
    pub fn seeded(files: &[(&str, &str)]) -> Self {
        Self {
            seed: files
                .iter()
                .map(|(path, body)| (path.to_string(), body.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn committed(&self) -> BTreeMap<String, String> {
        self.committed.lock().unwrap().clone().unwrap_or_default()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn snapshot(root: &Path) -> BTreeMap<String, String> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path: PathBuf = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.insert(relative, std::fs::read_to_string(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[async_trait]
impl GitOperations for FakeGit {
    async fn clone_repository(&self, clone_url: &str, destination: &Path) -> Result<(), GitError> {
        self.log(format!("clone {clone_url}"));
        for (path, body) in &self.seed {
            let full = destination.join(path);
            std::fs::create_dir_all(full.parent().unwrap())?;
            std::fs::write(full, body)?;
        }
        std::fs::create_dir_all(destination)?;
        Ok(())
    }

    async fn reset_to_upstream(
        &self,
        _checkout: &Path,
        upstream: &RepositoryRef,
        default_branch: &BranchName,
    ) -> Result<(), GitError> {
        self.log(format!("reset {upstream} {default_branch}"));
        Ok(())
    }

    async fn create_branch(&self, _checkout: &Path, branch: &BranchName) -> Result<(), GitError> {
        self.log(format!("branch {branch}"));
        Ok(())
    }

    async fn commit_and_push(
        &self,
        checkout: &Path,
        branch: &BranchName,
        message: &str,
    ) -> Result<CommitOutcome, GitError> {
        let first_line = message.lines().next().unwrap_or_default();
        self.log(format!("commit {branch} {first_line}"));
        let tree = snapshot(checkout);
        if tree == self.seed {
            return Ok(CommitOutcome::NoChanges);
        }
        *self.committed.lock().unwrap() = Some(tree);
        Ok(CommitOutcome::Pushed)
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

const GENERATE_PREFIX: &str = "Provide the complete content for the file: ";

/// Answers each of the four pipeline calls from fixed replies.
///
/// Calls are told apart by their completion budget: validation 500,
/// analysis 1000, planning 1500, generation 4000.
pub struct FakeModel {
    pub verdict: Result<String, ()>,
    pub files_to_read: String,
    pub plan: String,
    pub generated: HashMap<String, String>,
    pub generated_for: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<u32>>,
}

impl FakeModel {
    pub fn new(files_to_read: &[&str], files_to_modify: &[&str], explanation: &str) -> Self {
        Self {
            verdict: Ok(r#"{"isValid": true, "reason": "asks for a file change"}"#.into()),
            files_to_read: serde_json::json!({ "filesToRead": files_to_read }).to_string(),
            plan: serde_json::json!({
                "filesToModify": files_to_modify,
                "explanation": explanation,
            })
            .to_string(),
            generated: HashMap::new(),
            generated_for: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        let mut model = Self::new(&[], &[], "");
        model.verdict = Ok(serde_json::json!({ "isValid": false, "reason": reason }).to_string());
        model
    }

    pub fn generating(mut self, path: &str, body: &str) -> Self {
        self.generated.insert(path.to_string(), body.to_string());
        self
    }

    pub fn generated_for(&self) -> Vec<String> {
        self.generated_for.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(request.max_completion_tokens);
        match request.max_completion_tokens {
            500 => self
                .verdict
                .clone()
                .map_err(|()| LlmError::Transport("connection reset".into())),
            1_000 => Ok(self.files_to_read.clone()),
            1_500 => Ok(self.plan.clone()),
            _ => {
                let last = request.messages.last().map(|m| m.content.as_str()).unwrap_or_default();
                let path = last
                    .strip_prefix(GENERATE_PREFIX)
                    .and_then(|rest| rest.lines().next())
                    .unwrap_or_default()
                    .to_string();
                self.generated_for.lock().unwrap().push(path.clone());
                self.generated
                    .get(&path)
                    .cloned()
                    .ok_or_else(|| LlmError::Transport(format!("no reply scripted for {path}")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// [`MemoryStore`] that also keeps every progress record written, in order.
pub struct RecordingStore {
    inner: MemoryStore,
    pub history: Mutex<Vec<ProgressRecord>>,
}

impl RecordingStore {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: MemoryStore::with_clock(clock),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn stages(&self) -> Vec<(Stage, u32)> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.status, r.step))
            .collect()
    }
}

#[async_trait]
impl KeyValueStore for RecordingStore {
    async fn put(&self, item: StoredItem) -> Result<(), StoreError> {
        if !item.key.starts_with("rl#") {
            let record: ProgressRecord = serde_json::from_value(item.body.clone())?;
            self.history.lock().unwrap().push(record);
        }
        self.inner.put(item).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StoreError> {
        self.inner.get(key).await
    }

    async fn query_index(&self, partition: &str, since: i64) -> Result<Vec<StoredItem>, StoreError> {
        self.inner.query_index(partition, since).await
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Open,
    Full,
    Closed,
}

pub struct FakeQueue {
    pub mode: QueueMode,
    pub tasks: Mutex<Vec<DispatchTask>>,
}

impl FakeQueue {
    pub fn new(mode: QueueMode) -> Self {
        Self {
            mode,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> Vec<DispatchTask> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskQueue for FakeQueue {
    async fn enqueue(&self, task: DispatchTask) -> Result<(), DispatchError> {
        match self.mode {
            QueueMode::Open => {
                self.tasks.lock().unwrap().push(task);
                Ok(())
            }
            QueueMode::Full => Err(DispatchError::AtCapacity),
            QueueMode::Closed => Err(DispatchError::Unavailable("channel closed".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub host: Arc<FakeHost>,
    pub git: Arc<FakeGit>,
    pub model: Arc<FakeModel>,
    pub store: Arc<RecordingStore>,
    pub clock: Arc<ManualClock>,
    pub tracker: ProgressTracker,
    pub pipeline: ModificationPipeline,
    pub workspaces: TempDir,
}

impl Harness {
    pub fn new(host: FakeHost, git: FakeGit, model: FakeModel) -> Self {
        let host = Arc::new(host);
        let git = Arc::new(git);
        let model = Arc::new(model);
        let clock = Arc::new(ManualClock::new(Timestamp::from_unix_seconds(START)));
        let store = Arc::new(RecordingStore::new(clock.clone()));
        let tracker = ProgressTracker::new(store.clone(), clock.clone());
        let workspaces = tempfile::tempdir().unwrap();
        let pipeline = ModificationPipeline::new(PipelineContext {
            vcs: host.clone(),
            git: git.clone(),
            gateway: ModelGateway::new(model.clone()),
            tracker: tracker.clone(),
            clock: clock.clone(),
            settings: PipelineSettings {
                workspace_root: workspaces.path().to_path_buf(),
                ..PipelineSettings::default()
            },
        });
        Self {
            host,
            git,
            model,
            store,
            clock,
            tracker,
            pipeline,
            workspaces,
        }
    }

    /// Number of run directories still present under the workspace root.
    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.workspaces.path()).unwrap().count()
    }
}
