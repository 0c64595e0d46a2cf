//! Integration tests for the GDPR download and delete flows.
//!
//! Pages are simulated with [`HeadlessBrowser`]: `load` opens a new page in
//! the same tab, so session storage (the queue) and local storage (pending
//! redirects and codes) carry over exactly as they would in a browser.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use helsinki_profile_auth::{
    AUTHORIZATION_CODE_FRAME_NAME, AuthError, AuthorizationCodeManager, FrameLoaderConfig,
    OidcConfig,
};
use helsinki_profile_gdpr::executors::{
    DELETE_PROFILE, DOWNLOAD_PROFILE, GET_SERVICE_CONNECTIONS, LEGACY_BROKER_CODE,
    MODERN_PROVIDER_CODE, SAVE_FILE,
};
use helsinki_profile_gdpr::mocks::{BackendCall, MemoryFileSaver, MockProfileBackend};
use helsinki_profile_gdpr::{
    AuthorizationCodes, DOWNLOAD_FILE_NAME, DeleteOutcome, FlowOutcome, GdprError, GdprFlow,
    GdprFlowKind, GdprServices, IdentityBroker, handle_page_load,
};
use helsinki_profile_runtime::{QueueError, QueueEvent, wait_for_event};
use helsinki_profile_testing::{HeadlessBrowser, init_tracing, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

const ORIGIN: &str = "https://profiili.hel.fi";
const PROFILE_PAGE: &str = "https://profiili.hel.fi/";
const LEGACY_AUTHORITY: &str = "https://api.hel.fi/sso";
const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Fixtures
// ============================================================================

fn browser() -> HeadlessBrowser {
    init_tracing();
    HeadlessBrowser::new(ORIGIN, PROFILE_PAGE)
}

struct Deps {
    backend: Arc<MockProfileBackend>,
    saver: Arc<MemoryFileSaver>,
}

impl Deps {
    fn new(backend: MockProfileBackend) -> Self {
        Self {
            backend: Arc::new(backend),
            saver: Arc::new(MemoryFileSaver::new()),
        }
    }

    fn services(&self, page: &HeadlessBrowser) -> GdprServices {
        let ctx = page.context().clone();
        GdprServices {
            backend: self.backend.clone(),
            legacy_broker: Arc::new(AuthorizationCodeManager::new(
                OidcConfig::new(LEGACY_AUTHORITY, "profile-ui", format!("{ORIGIN}/callback"))
                    .with_authorization_path("/openid/authorize"),
                ctx.clone(),
            )),
            modern_provider: Arc::new(AuthorizationCodeManager::new(
                OidcConfig::new(
                    "https://tunnistus.hel.fi/auth/realms/helsinki-tunnistus",
                    "profile-ui",
                    format!("{ORIGIN}/gdpr-callback"),
                ),
                ctx.clone(),
            )),
            file_saver: self.saver.clone(),
            loader_config: FrameLoaderConfig::default(),
            ctx,
        }
    }

    fn flow(&self, kind: GdprFlowKind, page: &HeadlessBrowser) -> GdprFlow {
        GdprFlow::new(kind, self.services(page), Arc::new(test_clock())).unwrap()
    }
}

fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Play the modern provider: once the code frame appears, reply from it with
/// `code` and the frame's state. Returns the frame URL.
fn answer_code_frame(page: &HeadlessBrowser, code: &'static str) -> JoinHandle<String> {
    let page = page.clone();
    tokio::spawn(async move {
        loop {
            let frame = page
                .document()
                .frames()
                .into_iter()
                .find(|f| f.name == AUTHORIZATION_CODE_FRAME_NAME);
            if let Some(frame) = frame {
                let state = query_param(&frame.url, "state").unwrap();
                page.post_from_frame(
                    AUTHORIZATION_CODE_FRAME_NAME,
                    json!({"code": code, "state": state}),
                );
                return frame.url;
            }
            tokio::task::yield_now().await;
        }
    })
}

fn stored_queue(page: &HeadlessBrowser, kind: GdprFlowKind) -> Vec<Value> {
    match page.session_storage().json(&kind.storage_key()) {
        Some(Value::Array(records)) => records,
        other => panic!("expected a stored queue, got {other:?}"),
    }
}

// ============================================================================
// Download
// ============================================================================

#[tokio::test]
async fn test_download_with_modern_services_saves_file() {
    let page = browser();
    let deps = Deps::new(
        MockProfileBackend::new()
            .with_service("youth", IdentityBroker::Modern)
            .with_profile(json!({"key": "DATA", "children": [{"key": "NAME"}]})),
    );
    let flow = deps.flow(GdprFlowKind::Download, &page);

    let answer = answer_code_frame(&page, "modern-code");
    assert_eq!(flow.run(WAIT).await.unwrap(), FlowOutcome::Finished);

    let frame_url = answer.await.unwrap();
    assert_eq!(query_param(&frame_url, "scope").as_deref(), Some("openid youth.gdprquery"));
    assert!(page.location().navigations().is_empty());

    let files = deps.saver.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].0, DOWNLOAD_FILE_NAME);
    let saved: Value = serde_json::from_slice(&files[0].1).unwrap();
    assert_eq!(saved["children"][0]["key"], "NAME");

    assert_eq!(
        deps.backend.calls(),
        vec![
            BackendCall::ServiceConnections,
            BackendCall::Download(AuthorizationCodes {
                legacy: None,
                modern: Some("modern-code".to_string()),
            }),
        ]
    );
}

#[tokio::test]
async fn test_downloaded_profile_is_not_persisted() {
    let page = browser();
    let deps = Deps::new(MockProfileBackend::new());
    let flow = deps.flow(GdprFlowKind::Download, &page);

    assert_eq!(flow.run(WAIT).await.unwrap(), FlowOutcome::Finished);

    let records = stored_queue(&page, GdprFlowKind::Download);
    for record in &records {
        assert_eq!(record["complete"], true);
        if record["type"] == DOWNLOAD_PROFILE || record["type"] == SAVE_FILE {
            assert!(record.get("result").is_none(), "{record}");
        } else {
            assert!(record.get("result").is_some(), "{record}");
        }
    }
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_without_services_needs_no_codes() {
    let page = browser();
    let deps = Deps::new(MockProfileBackend::new());
    let flow = deps.flow(GdprFlowKind::Delete, &page);

    assert_eq!(flow.run(WAIT).await.unwrap(), FlowOutcome::Finished);

    assert!(page.location().navigations().is_empty());
    assert!(page.document().created().is_empty());
    assert_eq!(flow.delete_outcome(), Some(DeleteOutcome::success()));
    assert_eq!(
        deps.backend.calls().last(),
        Some(&BackendCall::Delete(AuthorizationCodes::default()))
    );
}

#[tokio::test]
async fn test_delete_reports_services_that_kept_data() {
    let page = browser();
    let deps = Deps::new(
        MockProfileBackend::new()
            .with_service("youth", IdentityBroker::Modern)
            .with_failed_deletion("youth"),
    );
    let flow = deps.flow(GdprFlowKind::Delete, &page);

    let answer = answer_code_frame(&page, "modern-code");
    assert_eq!(flow.run(WAIT).await.unwrap(), FlowOutcome::Finished);
    answer.await.unwrap();

    assert_eq!(
        flow.delete_outcome(),
        Some(DeleteOutcome {
            deleted: false,
            failed_services: vec!["youth".to_string()],
        })
    );
}

#[tokio::test]
async fn test_delete_resumes_after_legacy_broker_redirect() {
    let deps = Deps::new(
        MockProfileBackend::new()
            .with_service("berth", IdentityBroker::Legacy)
            .with_service("youth", IdentityBroker::Modern),
    );

    // Profile page: the flow redirects to the legacy broker and waits.
    let page = browser();
    let flow = deps.flow(GdprFlowKind::Delete, &page);
    assert_eq!(
        flow.run(WAIT).await.unwrap(),
        FlowOutcome::Suspended {
            action_type: LEGACY_BROKER_CODE.to_string()
        }
    );
    let authorize = page.location().last_navigation().unwrap();
    assert!(authorize.starts_with(&format!("{LEGACY_AUTHORITY}/openid/authorize?")));
    assert_eq!(query_param(&authorize, "scope").as_deref(), Some("openid berth.gdprdelete"));
    let state = query_param(&authorize, "state").unwrap();
    drop(flow);

    // Callback page: store the code and go back to the profile page.
    let callback = page.load(format!("{ORIGIN}/callback?code=legacy-code&state={state}"));
    let returned = handle_page_load(callback.context(), &deps.services(&callback).legacy_broker)
        .unwrap()
        .unwrap();
    assert_eq!(returned.deferred_action, GdprFlowKind::Delete.deferred_action());
    assert_eq!(returned.resume_url, format!("{PROFILE_PAGE}?a=gdprDelete"));
    assert_eq!(callback.location().last_navigation(), Some(returned.resume_url.clone()));

    // Profile page again: the restored flow continues where it stopped.
    let resumed = callback.load(returned.resume_url);
    let flow = deps.flow(GdprFlowKind::Delete, &resumed);
    assert_eq!(flow.queue().get_active().unwrap().action_type, LEGACY_BROKER_CODE);

    let answer = answer_code_frame(&resumed, "modern-code");
    assert_eq!(flow.resume_and_run(WAIT).await.unwrap(), Some(FlowOutcome::Finished));
    answer.await.unwrap();

    assert_eq!(resumed.location().replacements(), vec![PROFILE_PAGE.to_string()]);
    assert_eq!(flow.delete_outcome(), Some(DeleteOutcome::success()));
    assert_eq!(
        deps.backend.calls(),
        vec![
            BackendCall::ServiceConnections,
            BackendCall::Delete(AuthorizationCodes {
                legacy: Some("legacy-code".to_string()),
                modern: Some("modern-code".to_string()),
            }),
        ]
    );

    // A manual reload does not resume a second time.
    let reloaded = resumed.reload();
    let flow = deps.flow(GdprFlowKind::Delete, &reloaded);
    assert_eq!(flow.resume_after_redirect().unwrap(), None);
    assert!(flow.is_complete());
}

#[tokio::test]
async fn test_resumer_ignores_marker_of_other_flow() {
    let deps = Deps::new(MockProfileBackend::new().with_service("berth", IdentityBroker::Legacy));
    let page = browser();
    let flow = deps.flow(GdprFlowKind::Delete, &page);
    flow.run(WAIT).await.unwrap();

    let other = page.load(format!("{PROFILE_PAGE}?a=gdprDownload"));
    let flow = deps.flow(GdprFlowKind::Delete, &other);
    assert_eq!(flow.resume_and_run(WAIT).await.unwrap(), None);
    assert!(other.location().replacements().is_empty());
}

#[tokio::test]
async fn test_leftover_code_does_not_skip_legacy_redirect() {
    let deps = Deps::new(MockProfileBackend::new().with_service("berth", IdentityBroker::Legacy));
    let page = browser();
    page.context()
        .local_storage()
        .set_item("authorizationCodeManager.authorization_code", "stale-download-code")
        .unwrap();

    let flow = deps.flow(GdprFlowKind::Delete, &page);
    assert_eq!(
        flow.run(WAIT).await.unwrap(),
        FlowOutcome::Suspended {
            action_type: LEGACY_BROKER_CODE.to_string()
        }
    );

    let authorize = page.location().last_navigation().unwrap();
    assert_eq!(query_param(&authorize, "scope").as_deref(), Some("openid berth.gdprdelete"));
    assert_eq!(deps.backend.calls(), vec![BackendCall::ServiceConnections]);
}

#[tokio::test]
async fn test_abandoned_download_redirect_does_not_feed_delete() {
    let deps = Deps::new(MockProfileBackend::new().with_service("berth", IdentityBroker::Legacy));

    // Download redirects to the broker, which returns, but the user never
    // goes back to the profile page.
    let page = browser();
    let download = deps.flow(GdprFlowKind::Download, &page);
    assert!(matches!(download.run(WAIT).await.unwrap(), FlowOutcome::Suspended { .. }));
    let state = query_param(&page.location().last_navigation().unwrap(), "state").unwrap();
    drop(download);

    let callback = page.load(format!("{ORIGIN}/callback?code=download-code&state={state}"));
    let abandoned = handle_page_load(callback.context(), &deps.services(&callback).legacy_broker)
        .unwrap()
        .unwrap();
    assert_eq!(abandoned.deferred_action, GdprFlowKind::Download.deferred_action());

    // Later the user starts a delete from a fresh profile page.
    let profile = callback.load(PROFILE_PAGE);
    let delete = deps.flow(GdprFlowKind::Delete, &profile);
    assert_eq!(
        delete.run(WAIT).await.unwrap(),
        FlowOutcome::Suspended {
            action_type: LEGACY_BROKER_CODE.to_string()
        }
    );
    assert!(
        !deps
            .backend
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::Delete(_)))
    );
    let authorize = profile.location().last_navigation().unwrap();
    assert_eq!(query_param(&authorize, "scope").as_deref(), Some("openid berth.gdprdelete"));
    let state = query_param(&authorize, "state").unwrap();
    drop(delete);

    // The delete's own return completes it with the delete code.
    let callback = profile.load(format!("{ORIGIN}/callback?code=delete-code&state={state}"));
    let returned = handle_page_load(callback.context(), &deps.services(&callback).legacy_broker)
        .unwrap()
        .unwrap();
    let resumed = callback.load(returned.resume_url);
    let delete = deps.flow(GdprFlowKind::Delete, &resumed);
    assert_eq!(delete.resume_and_run(WAIT).await.unwrap(), Some(FlowOutcome::Finished));
    assert_eq!(
        deps.backend.calls().last(),
        Some(&BackendCall::Delete(AuthorizationCodes {
            legacy: Some("delete-code".to_string()),
            modern: None,
        }))
    );

    // Going back to the abandoned download finds its code gone.
    let late = resumed.load(abandoned.resume_url);
    let download = deps.flow(GdprFlowKind::Download, &late);
    match download.resume_and_run(WAIT).await.unwrap() {
        Some(FlowOutcome::Failed { action_type, .. }) => assert_eq!(action_type, LEGACY_BROKER_CODE),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(
        !deps
            .backend
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::Download(_)))
    );
}

// ============================================================================
// Failure and retry
// ============================================================================

#[tokio::test]
async fn test_failed_code_step_retries_without_repeating_earlier_steps() {
    let page = browser();
    page.document().refuse_frames(true);
    let deps = Deps::new(MockProfileBackend::new().with_service("youth", IdentityBroker::Modern));
    let flow = deps.flow(GdprFlowKind::Delete, &page);

    match flow.run(WAIT).await.unwrap() {
        FlowOutcome::Failed { action_type, .. } => assert_eq!(action_type, MODERN_PROVIDER_CODE),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(flow.failed_action().unwrap().action_type, MODERN_PROVIDER_CODE);

    page.document().refuse_frames(false);
    let answer = answer_code_frame(&page, "modern-code");
    let mut events = flow.subscribe();
    flow.retry().unwrap();
    wait_for_event(&mut events, |e| *e == QueueEvent::Finished, WAIT)
        .await
        .unwrap();
    answer.await.unwrap();

    let connection_fetches = deps
        .backend
        .calls()
        .into_iter()
        .filter(|call| *call == BackendCall::ServiceConnections)
        .count();
    assert_eq!(connection_fetches, 1);
    assert!(flow.failed_action().is_none());
}

#[tokio::test]
async fn test_backend_failure_is_recorded_on_first_step() {
    let page = browser();
    let deps = Deps::new(MockProfileBackend::failing());
    let flow = deps.flow(GdprFlowKind::Download, &page);

    assert_eq!(
        flow.run(WAIT).await.unwrap(),
        FlowOutcome::Failed {
            action_type: GET_SERVICE_CONNECTIONS.to_string(),
            message: "Backend error (status 500): mock backend failure".to_string(),
        }
    );
    assert!(deps.saver.files().is_empty());
}

#[tokio::test]
async fn test_lost_legacy_code_restarts_whole_flow() {
    let deps = Deps::new(MockProfileBackend::new().with_service("berth", IdentityBroker::Legacy));
    let page = browser();
    deps.flow(GdprFlowKind::Delete, &page).run(WAIT).await.unwrap();

    // The pending redirect is lost, e.g. the user cleared site data.
    let local = page.context().local_storage();
    for key in local.keys() {
        local.remove_item(&key);
    }

    let returned = page.load(format!("{PROFILE_PAGE}?a=gdprDelete"));
    let flow = deps.flow(GdprFlowKind::Delete, &returned);
    match flow.resume_and_run(WAIT).await.unwrap() {
        Some(FlowOutcome::Failed { action_type, .. }) => assert_eq!(action_type, LEGACY_BROKER_CODE),
        other => panic!("expected failure, got {other:?}"),
    }

    let mut events = flow.subscribe();
    flow.retry().unwrap();
    let event = wait_for_event(&mut events, |e| matches!(e, QueueEvent::Suspended { .. }), WAIT)
        .await
        .unwrap();
    assert_eq!(
        event,
        QueueEvent::Suspended {
            action_type: LEGACY_BROKER_CODE.to_string()
        }
    );
    assert_eq!(returned.location().navigations().len(), 1);
    assert_eq!(
        deps.backend
            .calls()
            .iter()
            .filter(|call| **call == BackendCall::ServiceConnections)
            .count(),
        2
    );
}

// ============================================================================
// Page load and storage
// ============================================================================

#[tokio::test]
async fn test_page_load_only_handles_returns_to_redirect_uri() {
    let page = browser();
    let deps = Deps::new(MockProfileBackend::new());

    let elsewhere = page.load(format!("{ORIGIN}/profile?code=c&state=s"));
    assert_eq!(
        handle_page_load(elsewhere.context(), &deps.services(&elsewhere).legacy_broker).unwrap(),
        None
    );

    let plain = page.load(format!("{ORIGIN}/callback"));
    assert_eq!(
        handle_page_load(plain.context(), &deps.services(&plain).legacy_broker).unwrap(),
        None
    );

    let unknown = page.load(format!("{ORIGIN}/callback?code=c&state=never-issued"));
    assert_eq!(
        handle_page_load(unknown.context(), &deps.services(&unknown).legacy_broker),
        Err(GdprError::Auth(AuthError::UnknownState {
            state: "never-issued".to_string()
        }))
    );
    assert!(unknown.location().navigations().is_empty());
}

#[tokio::test]
async fn test_mismatched_stored_flow_is_rejected_until_discarded() {
    let page = browser();
    let deps = Deps::new(MockProfileBackend::new());
    let new_flow = |kind| GdprFlow::new(kind, deps.services(&page), Arc::new(test_clock()));

    // A download queue stored under the delete key has the wrong steps.
    deps.flow(GdprFlowKind::Download, &page);
    let download = page
        .context()
        .session_storage()
        .get_item(&GdprFlowKind::Download.storage_key())
        .unwrap();
    page.context()
        .session_storage()
        .set_item(&GdprFlowKind::Delete.storage_key(), &download)
        .unwrap();

    assert!(matches!(
        new_flow(GdprFlowKind::Delete),
        Err(GdprError::Queue(QueueError::RestoreLengthMismatch {
            expected: 6,
            found: 7
        }))
    ));
    assert_eq!(stored_queue(&page, GdprFlowKind::Delete).len(), 7);

    page.context()
        .session_storage()
        .set_item(&GdprFlowKind::Delete.storage_key(), "not json")
        .unwrap();
    assert!(matches!(
        new_flow(GdprFlowKind::Delete),
        Err(GdprError::Queue(QueueError::Storage(_)))
    ));

    GdprFlow::discard_stored(GdprFlowKind::Delete, page.context());
    let flow = new_flow(GdprFlowKind::Delete).unwrap();
    let types: Vec<_> = flow
        .queue()
        .actions()
        .into_iter()
        .map(|a| a.action_type)
        .collect();
    assert_eq!(types.last().map(String::as_str), Some(DELETE_PROFILE));
    assert_eq!(stored_queue(&page, GdprFlowKind::Delete).len(), types.len());
    assert!(page.session_storage().json(&GdprFlowKind::Download.storage_key()).is_some());
}

#[tokio::test]
async fn test_clean_up_removes_stored_flow() {
    let page = browser();
    let deps = Deps::new(MockProfileBackend::new());
    let flow = deps.flow(GdprFlowKind::Download, &page);
    assert!(page.session_storage().json(&GdprFlowKind::Download.storage_key()).is_some());

    flow.clean_up();

    assert!(page.session_storage().json(&GdprFlowKind::Download.storage_key()).is_none());
    assert!(matches!(flow.start(), Err(GdprError::Queue(_))));
}
