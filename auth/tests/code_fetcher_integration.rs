//! Integration tests for background authorization-code fetching.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use helsinki_profile_auth::{
    AUTHORIZATION_CODE_FRAME_NAME, AuthError, AuthorizationCodeFetcher, AuthorizationCodeManager,
    FrameLoaderConfig, LoaderError, OidcConfig, PendingCode, fetch_authorization_code,
    relay_code_to_parent,
};
use helsinki_profile_testing::{HeadlessBrowser, init_tracing};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const ORIGIN: &str = "https://profiili.hel.fi";

// ============================================================================
// Test Fixtures
// ============================================================================

fn browser() -> HeadlessBrowser {
    init_tracing();
    HeadlessBrowser::new(ORIGIN, format!("{ORIGIN}/"))
}

fn manager(browser: &HeadlessBrowser) -> Arc<AuthorizationCodeManager> {
    Arc::new(AuthorizationCodeManager::new(
        OidcConfig::new(
            "https://tunnistus.hel.fi/auth/realms/helsinki-tunnistus",
            "profile-ui",
            format!("{ORIGIN}/callback"),
        ),
        browser.context().clone(),
    ))
}

/// Fetcher whose callback records every call.
fn recording_fetcher(browser: &HeadlessBrowser) -> (AuthorizationCodeFetcher, Arc<Mutex<Vec<Option<String>>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);
    let fetcher = AuthorizationCodeFetcher::new(browser.context().clone(), manager(browser), move |code| {
        recorded.lock().unwrap().push(code);
    });
    (fetcher, calls)
}

/// State parameter of the URL the code frame was navigated to.
fn frame_state(browser: &HeadlessBrowser) -> String {
    let frame = browser
        .document()
        .frames()
        .into_iter()
        .find(|f| f.name == AUTHORIZATION_CODE_FRAME_NAME)
        .unwrap();
    Url::parse(&frame.url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

// ============================================================================
// Fetcher scenarios
// ============================================================================

#[tokio::test]
async fn test_fetch_success_calls_back_once() {
    let browser = browser();
    let (fetcher, calls) = recording_fetcher(&browser);
    let mut fetching = fetcher.watch_fetching();
    assert!(!*fetching.borrow_and_update());

    let task = fetcher.fetch(&["scope1", "scope2"]).unwrap();
    assert!(fetcher.is_fetching());
    assert!(*fetching.borrow_and_update());

    let frame_url = browser.document().frames()[0].url.clone();
    assert!(frame_url.contains("scope=openid+scope1+scope2"));

    let state = frame_state(&browser);
    browser.post_from_frame(
        AUTHORIZATION_CODE_FRAME_NAME,
        json!({"code": "authCode", "state": state}),
    );
    task.await.unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![Some("authCode".to_string())]);
    assert_eq!(fetcher.code().as_deref(), Some("authCode"));
    assert!(!fetcher.is_fetching());
    assert!(fetching.has_changed().unwrap());
    assert!(!*fetching.borrow_and_update());
    assert!(browser.document().frames().is_empty());
}

#[tokio::test]
async fn test_stale_state_is_not_accepted() {
    let browser = browser();
    let (fetcher, calls) = recording_fetcher(&browser);
    let task = fetcher.fetch(&["scope"]).unwrap();
    let state = frame_state(&browser);

    browser.post_from_frame(
        AUTHORIZATION_CODE_FRAME_NAME,
        json!({"code": "replayed", "state": "from-an-earlier-fetch"}),
    );
    browser.post_from_frame(
        AUTHORIZATION_CODE_FRAME_NAME,
        json!({"code": "fresh", "state": state}),
    );
    task.await.unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![Some("fresh".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_calls_back_with_none() {
    let browser = browser();
    let (fetcher, calls) = recording_fetcher(&browser);

    let task = fetcher.fetch(&["scope"]).unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    task.await.unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![None]);
    assert_eq!(fetcher.code(), None);
    assert!(!fetcher.is_fetching());
}

#[tokio::test]
async fn test_unmount_before_reply_has_no_effect() {
    let browser = browser();
    let (fetcher, calls) = recording_fetcher(&browser);

    let task = fetcher.fetch(&["scope"]).unwrap();
    let state = frame_state(&browser);
    fetcher.unmount();

    browser.post_from_frame(
        AUTHORIZATION_CODE_FRAME_NAME,
        json!({"code": "late", "state": state}),
    );
    task.await.unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(fetcher.code(), None);
    assert!(fetcher.is_fetching());
    assert!(browser.document().frames().is_empty());
    assert!(fetcher.fetch(&["scope"]).is_none());
}

#[tokio::test]
async fn test_dropping_fetcher_cancels_handshake() {
    let browser = browser();
    let (fetcher, calls) = recording_fetcher(&browser);

    let task = fetcher.fetch(&["scope"]).unwrap();
    drop(fetcher);
    task.await.unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert!(browser.document().frames().is_empty());
}

#[tokio::test]
async fn test_refused_frame_calls_back_immediately() {
    let browser = browser();
    browser.document().refuse_frames(true);
    let (fetcher, calls) = recording_fetcher(&browser);

    assert!(fetcher.fetch(&["scope"]).is_none());
    assert_eq!(*calls.lock().unwrap(), vec![None]);
    assert!(!fetcher.is_fetching());
}

#[tokio::test]
async fn test_sequential_fetches_each_call_back() {
    let browser = browser();
    let (fetcher, calls) = recording_fetcher(&browser);

    let first = fetcher.fetch(&["a"]).unwrap();
    let first_state = frame_state(&browser);
    // The second fetch attaches to the frame the first one created.
    let second = fetcher.fetch(&["b"]).unwrap();

    browser.post_from_frame(
        AUTHORIZATION_CODE_FRAME_NAME,
        json!({"code": "for-first", "state": first_state}),
    );
    first.await.unwrap();
    second.await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls.contains(&Some("for-first".to_string())));
    assert!(calls.contains(&None));
}

// ============================================================================
// Building blocks
// ============================================================================

#[tokio::test]
async fn test_relay_from_frame_page_completes_fetch() {
    let browser = browser();
    let manager = manager(&browser);
    let pending = PendingCode::open(
        browser.context(),
        &manager,
        &["gdpr.read"],
        FrameLoaderConfig::default(),
    )
    .unwrap();

    let callback = format!("{ORIGIN}/callback?code=via-relay&state={}", pending.state());
    let frame_page = browser.frame_page(AUTHORIZATION_CODE_FRAME_NAME, callback).unwrap();
    relay_code_to_parent(frame_page.context(), browser.context().messages()).unwrap();

    assert_eq!(pending.code().await.unwrap(), "via-relay");
}

#[tokio::test]
async fn test_relay_requires_code_and_state() {
    let browser = browser();
    browser
        .context()
        .frames()
        .create_hidden_frame(AUTHORIZATION_CODE_FRAME_NAME, "https://idp")
        .unwrap();
    let frame_page = browser
        .frame_page(AUTHORIZATION_CODE_FRAME_NAME, format!("{ORIGIN}/callback?error=access_denied"))
        .unwrap();

    assert_eq!(
        relay_code_to_parent(frame_page.context(), browser.context().messages()),
        Err(AuthError::MissingParameter("code"))
    );
}

#[tokio::test]
async fn test_fetch_authorization_code_reports_cancellation() {
    let browser = browser();
    let manager = manager(&browser);
    let ctx = browser.context().clone();

    let fetching = tokio::spawn(async move {
        fetch_authorization_code(&ctx, &manager, &["scope"], FrameLoaderConfig::default()).await
    });
    tokio::task::yield_now().await;
    helsinki_profile_auth::cancel(browser.context(), AUTHORIZATION_CODE_FRAME_NAME);

    assert!(matches!(
        fetching.await.unwrap(),
        Err(AuthError::Loader(LoaderError::Cancelled { .. }))
    ));
}
