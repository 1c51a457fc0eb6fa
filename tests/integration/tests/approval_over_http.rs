use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tern_activity::{
    ActivityContent, ActivityPoster, ActivityPublisher, ActivityReceipt, AgentRuntimeMessage,
    ApprovalGateway, CollaboratorError, CreateActivityRequest, MessageDisposition,
    ProcedureAdvancer, ProcedureAdvancerConfig, ProcedureCatalog, ProcedureOutcome,
    SessionActivityEngine, SubroutineDefinition, SubroutineResumer,
};
use tern_gateway::{RequestGateway, RequestGatewayConfig};
use tern_session::{AgentSession, IssueRef, SessionStatus, SessionStore, WorkspaceRef};

#[derive(Default)]
struct RecordingPoster {
    requests: Mutex<Vec<CreateActivityRequest>>,
}

impl RecordingPoster {
    fn requests(&self) -> Vec<CreateActivityRequest> {
        self.requests.lock().expect("poster lock").clone()
    }
}

#[async_trait]
impl ActivityPoster for RecordingPoster {
    async fn create_activity(
        &self,
        request: CreateActivityRequest,
    ) -> Result<ActivityReceipt, CollaboratorError> {
        let mut requests = self.requests.lock().expect("poster lock");
        requests.push(request);
        Ok(ActivityReceipt {
            activity_id: Some(format!("activity-{}", requests.len())),
        })
    }
}

/// Two-step procedure: "plan" needs approval before "implement" runs.
struct TwoStepCatalog {
    current: Mutex<SubroutineDefinition>,
    next: Mutex<Option<SubroutineDefinition>>,
}

impl TwoStepCatalog {
    fn new() -> Self {
        Self {
            current: Mutex::new(SubroutineDefinition::new("plan").requiring_approval()),
            next: Mutex::new(Some(SubroutineDefinition::new("implement"))),
        }
    }
}

impl ProcedureCatalog for TwoStepCatalog {
    fn current_subroutine(&self, _session: &AgentSession) -> Option<SubroutineDefinition> {
        Some(self.current.lock().expect("catalog lock").clone())
    }

    fn next_subroutine(&self, _session: &AgentSession) -> Option<SubroutineDefinition> {
        self.next.lock().expect("catalog lock").clone()
    }

    fn advance_to_next_subroutine(
        &self,
        _session: &AgentSession,
        _runtime_session_id: Option<&str>,
    ) -> Result<(), CollaboratorError> {
        let next = self
            .next
            .lock()
            .expect("catalog lock")
            .take()
            .ok_or_else(|| CollaboratorError::failed("advance", "no next subroutine"))?;
        *self.current.lock().expect("catalog lock") = next;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingResumer {
    resumed: Mutex<Vec<String>>,
}

#[async_trait]
impl SubroutineResumer for RecordingResumer {
    async fn resume_next_subroutine(&self, session_id: &str) -> Result<(), CollaboratorError> {
        self.resumed
            .lock()
            .expect("resumer lock")
            .push(session_id.to_string());
        Ok(())
    }
}

struct Fixture {
    gateway: RequestGateway,
    engine: Arc<SessionActivityEngine>,
    store: Arc<SessionStore>,
    poster: Arc<RecordingPoster>,
    resumer: Arc<RecordingResumer>,
}

async fn start_fixture() -> Fixture {
    let approvals = Arc::new(ApprovalGateway::default());
    let gateway = RequestGateway::new(RequestGatewayConfig {
        bind: "127.0.0.1:0".to_string(),
        ..RequestGatewayConfig::default()
    })
    .with_approvals(Arc::clone(&approvals));
    gateway.start().await.expect("start gateway");
    tokio::time::sleep(Duration::from_millis(25)).await;

    let store = Arc::new(SessionStore::default());
    let poster = Arc::new(RecordingPoster::default());
    let resumer = Arc::new(RecordingResumer::default());
    let advancer = ProcedureAdvancer::new(ActivityPublisher::new(
        Arc::clone(&store),
        poster.clone(),
    ))
    .with_catalog(Arc::new(TwoStepCatalog::new()))
    .with_approvals(approvals)
    .with_subroutine_resumer(resumer.clone())
    .with_config(ProcedureAdvancerConfig {
        approval_timeout: Duration::from_secs(5),
    });
    store.create_session(
        "session-1",
        IssueRef::new("issue-1", "ENG-9"),
        WorkspaceRef::new("/tmp/eng-9"),
        false,
    );

    Fixture {
        gateway,
        engine: Arc::new(SessionActivityEngine::new(Arc::new(advancer))),
        store,
        poster,
        resumer,
    }
}

async fn wait_for_elicitation_url(poster: &RecordingPoster) -> String {
    for _ in 0..200 {
        let url = poster.requests().into_iter().find_map(|request| {
            let is_elicitation = matches!(request.content, ActivityContent::Elicitation { .. });
            let metadata_url = request
                .signal_metadata
                .as_ref()
                .and_then(|metadata| metadata.get("url"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if is_elicitation && request.signal.is_none() {
                metadata_url
            } else {
                None
            }
        });
        if let Some(url) = url {
            return url;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("approval elicitation was never posted");
}

#[tokio::test]
async fn integration_http_approval_advances_procedure_to_next_step() {
    let fixture = start_fixture().await;
    let base = fixture.gateway.public_base_url();

    let engine = Arc::clone(&fixture.engine);
    let completion = tokio::spawn(async move {
        engine
            .handle_runtime_message(
                "session-1",
                &AgentRuntimeMessage::result_success("Plan: touch two files."),
            )
            .await
    });

    let approval_url = wait_for_elicitation_url(&fixture.poster).await;
    assert!(approval_url.starts_with(&base));
    let page = reqwest::get(&approval_url).await.expect("approval page");
    assert_eq!(page.status(), reqwest::StatusCode::OK);

    let decision = reqwest::get(format!("{approval_url}&action=approve&feedback=looks%20good"))
        .await
        .expect("approve");
    assert_eq!(decision.status(), reqwest::StatusCode::OK);

    let disposition = completion.await.expect("join completion");
    assert!(matches!(
        disposition,
        MessageDisposition::Completed {
            outcome: ProcedureOutcome::Advanced { ref next_subroutine, resumed: true },
            ..
        } if next_subroutine == "implement"
    ));
    assert_eq!(
        fixture.resumer.resumed.lock().expect("resumer lock").as_slice(),
        &["session-1".to_string()]
    );
    assert!(fixture.poster.requests().iter().any(|request| matches!(
        &request.content,
        ActivityContent::Thought { body } if body == "Approval feedback: looks good"
    )));
    let session = fixture.store.session("session-1").expect("session");
    assert_eq!(session.status, SessionStatus::Active);

    fixture.gateway.stop().await.expect("stop gateway");
}

#[tokio::test]
async fn integration_http_rejection_stops_procedure_with_error_activity() {
    let fixture = start_fixture().await;

    let engine = Arc::clone(&fixture.engine);
    let completion = tokio::spawn(async move {
        engine
            .handle_runtime_message(
                "session-1",
                &AgentRuntimeMessage::result_success("Plan: rewrite everything."),
            )
            .await
    });

    let approval_url = wait_for_elicitation_url(&fixture.poster).await;
    let client = reqwest::Client::new();
    let decision = client
        .post(format!("{approval_url}&action=reject&feedback=too%20broad"))
        .send()
        .await
        .expect("reject");
    assert_eq!(decision.status(), reqwest::StatusCode::OK);

    let disposition = completion.await.expect("join completion");
    assert!(matches!(
        disposition,
        MessageDisposition::Completed {
            outcome: ProcedureOutcome::ApprovalRejected,
            ..
        }
    ));
    assert!(fixture.resumer.resumed.lock().expect("resumer lock").is_empty());
    let last = fixture.poster.requests().pop().expect("posted activities");
    match last.content {
        ActivityContent::Error { body } => {
            assert!(body.starts_with("Approval was rejected."));
            assert!(body.ends_with("Feedback: too broad"));
        }
        other => panic!("expected error activity, got {other:?}"),
    }
    let replay = client
        .get(format!("{approval_url}&action=approve"))
        .send()
        .await
        .expect("replayed decision");
    assert_eq!(replay.status(), reqwest::StatusCode::NOT_FOUND);
    drop(client);

    fixture.gateway.stop().await.expect("stop gateway");
}
