//! Activity engine tests with recording fakes for every collaborator.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tern_session::{AgentSession, IssueRef, SessionStore, WorkspaceRef};

use super::{
    ActivityContent, ActivityPoster, ActivityPublisher, ActivityReceipt, ApprovalGateway,
    CollaboratorError, CreateActivityRequest, ParentResolver, ParentResumer, ProcedureAdvancer,
    ProcedureAdvancerConfig, ProcedureCatalog, SessionActivityEngine, SubroutineDefinition,
    SubroutineResumer,
};

mod engine;

#[derive(Default)]
struct RecordingPoster {
    requests: Mutex<Vec<CreateActivityRequest>>,
    fail: AtomicBool,
    issued: AtomicUsize,
}

impl RecordingPoster {
    fn requests(&self) -> Vec<CreateActivityRequest> {
        self.requests.lock().expect("poster lock").clone()
    }

    fn contents(&self) -> Vec<ActivityContent> {
        self.requests()
            .into_iter()
            .map(|request| request.content)
            .collect()
    }

    fn count(&self) -> usize {
        self.requests.lock().expect("poster lock").len()
    }
}

#[async_trait]
impl ActivityPoster for RecordingPoster {
    async fn create_activity(
        &self,
        request: CreateActivityRequest,
    ) -> Result<ActivityReceipt, CollaboratorError> {
        self.requests.lock().expect("poster lock").push(request);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("create_activity", "upstream 503"));
        }
        let issued = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ActivityReceipt {
            activity_id: Some(format!("activity-{issued}")),
        })
    }
}

#[derive(Default)]
struct FakeCatalog {
    current: Mutex<Option<SubroutineDefinition>>,
    next: Mutex<Option<SubroutineDefinition>>,
    advances: Mutex<Vec<(String, Option<String>)>>,
    fail_advance: AtomicBool,
}

impl FakeCatalog {
    fn set_steps(&self, current: Option<SubroutineDefinition>, next: Option<SubroutineDefinition>) {
        *self.current.lock().expect("catalog lock") = current;
        *self.next.lock().expect("catalog lock") = next;
    }

    fn advances(&self) -> Vec<(String, Option<String>)> {
        self.advances.lock().expect("catalog lock").clone()
    }
}

impl ProcedureCatalog for FakeCatalog {
    fn current_subroutine(&self, _session: &AgentSession) -> Option<SubroutineDefinition> {
        self.current.lock().expect("catalog lock").clone()
    }

    fn next_subroutine(&self, _session: &AgentSession) -> Option<SubroutineDefinition> {
        self.next.lock().expect("catalog lock").clone()
    }

    fn advance_to_next_subroutine(
        &self,
        session: &AgentSession,
        runtime_session_id: Option<&str>,
    ) -> Result<(), CollaboratorError> {
        if self.fail_advance.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("advance", "cursor locked"));
        }
        self.advances
            .lock()
            .expect("catalog lock")
            .push((session.id.clone(), runtime_session_id.map(str::to_string)));
        let next = self.next.lock().expect("catalog lock").take();
        *self.current.lock().expect("catalog lock") = next;
        Ok(())
    }
}

#[derive(Default)]
struct FakeParents {
    parent: Mutex<Option<String>>,
    resumes: Mutex<Vec<(String, String, String)>>,
    fail: AtomicBool,
}

impl FakeParents {
    fn resumes(&self) -> Vec<(String, String, String)> {
        self.resumes.lock().expect("parents lock").clone()
    }
}

impl ParentResolver for FakeParents {
    fn parent_session_id(&self, _child_session_id: &str) -> Option<String> {
        self.parent.lock().expect("parents lock").clone()
    }
}

#[async_trait]
impl ParentResumer for FakeParents {
    async fn resume_parent_session(
        &self,
        parent_session_id: &str,
        prompt: &str,
        child_session_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.resumes.lock().expect("parents lock").push((
            parent_session_id.to_string(),
            prompt.to_string(),
            child_session_id.to_string(),
        ));
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("resume_parent_session", "parent busy"));
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeSubroutineResumer {
    resumes: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl FakeSubroutineResumer {
    fn resumes(&self) -> Vec<String> {
        self.resumes.lock().expect("resumer lock").clone()
    }
}

#[async_trait]
impl SubroutineResumer for FakeSubroutineResumer {
    async fn resume_next_subroutine(&self, session_id: &str) -> Result<(), CollaboratorError> {
        self.resumes
            .lock()
            .expect("resumer lock")
            .push(session_id.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("resume_next_subroutine", "runtime gone"));
        }
        Ok(())
    }
}

struct Harness {
    store: Arc<SessionStore>,
    poster: Arc<RecordingPoster>,
    catalog: Arc<FakeCatalog>,
    parents: Arc<FakeParents>,
    resumer: Arc<FakeSubroutineResumer>,
    approvals: Arc<ApprovalGateway>,
    engine: SessionActivityEngine,
}

fn harness() -> Harness {
    build_harness(true, Duration::from_secs(5))
}

fn build_harness(with_approvals: bool, approval_timeout: Duration) -> Harness {
    let store = Arc::new(SessionStore::default());
    let poster = Arc::new(RecordingPoster::default());
    let catalog = Arc::new(FakeCatalog::default());
    let parents = Arc::new(FakeParents::default());
    let resumer = Arc::new(FakeSubroutineResumer::default());
    let approvals = Arc::new(ApprovalGateway::new("https://agent.example.test"));

    let publisher = ActivityPublisher::new(Arc::clone(&store), poster.clone());
    let mut advancer = ProcedureAdvancer::new(publisher)
        .with_catalog(catalog.clone())
        .with_parent_resolver(parents.clone())
        .with_parent_resumer(parents.clone())
        .with_subroutine_resumer(resumer.clone())
        .with_config(ProcedureAdvancerConfig { approval_timeout });
    if with_approvals {
        advancer = advancer.with_approvals(Arc::clone(&approvals));
    }

    Harness {
        store,
        poster,
        catalog,
        parents,
        resumer,
        approvals,
        engine: SessionActivityEngine::new(Arc::new(advancer)),
    }
}

fn issue() -> IssueRef {
    IssueRef {
        id: "issue-1".to_string(),
        identifier: "ENG-42".to_string(),
        title: "Fix flaky login test".to_string(),
    }
}

fn workspace() -> WorkspaceRef {
    WorkspaceRef::new("/tmp/tern-worktrees/ENG-42")
}

impl Harness {
    fn create_session(&self, session_id: &str, local_only: bool) -> AgentSession {
        self.store
            .create_session(session_id, issue(), workspace(), local_only)
    }
}
