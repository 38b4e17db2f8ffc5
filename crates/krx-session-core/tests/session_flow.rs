//! End-to-end session handling against a mock portal.

use std::sync::Arc;

use krx_session_core::{
    Dispatcher, LoginOptions, SessionConfig, SessionError, SessionManager, SessionStore,
};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LANDING: &str = "/contents/MDC/COMS/client/view/login.jsp";
const LOGIN: &str = "/contents/MDC/COMS/client/MDCCOMS001D1.cmd";
const DATA: &str = "/comm/bldAttendant/getJsonData.cmd";

fn config(server: &MockServer, dir: &TempDir, with_credentials: bool) -> SessionConfig {
    let mut config = SessionConfig::with_session_file(dir.path().join("session.json"));
    config.base_url = server.uri();
    if with_credentials {
        config.env_id = Some("user".to_string());
        config.env_secret = Some("secret".to_string());
    }
    config
}

async fn mount_login(server: &MockServer, expected_logins: u64) {
    Mock::given(method("GET"))
        .and(path(LANDING))
        .and(query_param("site", "mdc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .expect(expected_logins)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(LOGIN))
        .and(body_string_contains("mbrId=user"))
        .and(body_string_contains("pw=secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "JSESSIONID=abc123; Path=/")
                .set_body_string(r#"{"MBR_NO": "M0001", "_error_code": "CD001"}"#),
        )
        .expect(expected_logins)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_explicit_login_persists_cookies() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_login(&server, 1).await;

    let manager = SessionManager::new(config(&server, &dir, false));
    let outcome = manager
        .login(Some("user"), Some("secret"), &LoginOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.mbr_no, "M0001");
    assert_eq!(
        outcome.session.jar().get("JSESSIONID").map(|c| c.value),
        Some("abc123".to_string())
    );

    let record = SessionStore::new(dir.path().join("session.json"))
        .load()
        .expect("session file written");
    assert_eq!(record.ttl_minutes, 30);
    assert_eq!(record.mbr_no.as_deref(), Some("M0001"));
    assert_eq!(record.cookies["JSESSIONID"].value, "abc123");
    assert!(dir.path().join("session.json.lock").exists());
}

#[tokio::test]
async fn test_second_process_reuses_stored_session() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_login(&server, 1).await;

    Mock::given(method("POST"))
        .and(path(DATA))
        .and(header("cookie", "JSESSIONID=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"output": [1]}"#))
        .expect(1)
        .mount(&server)
        .await;

    // First "process" logs in
    let first = SessionManager::new(config(&server, &dir, true));
    first
        .login(None, None, &LoginOptions::default())
        .await
        .unwrap();

    // Second "process" starts cold and must not log in again
    let second = Arc::new(SessionManager::new(config(&server, &dir, true)));
    let dispatcher = Dispatcher::new(second.clone());
    let url = format!("{}{}", server.uri(), DATA);
    let response = dispatcher
        .post(&url, None, [("bld", "dbms/MDC/STAT/standard/MDCSTAT01501")], None)
        .await
        .unwrap();

    assert_eq!(response.text(), r#"{"output": [1]}"#);
    assert!(second.current().is_some());
}

#[tokio::test]
async fn test_logout_response_triggers_relogin_and_single_retry() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_login(&server, 2).await;

    Mock::given(method("GET"))
        .and(path(DATA))
        .respond_with(ResponseTemplate::new(200).set_body_string("LOGOUT"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(DATA))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"output": []}"#))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(Arc::new(SessionManager::new(config(&server, &dir, true))));
    let url = format!("{}{}", server.uri(), DATA);
    let response = dispatcher
        .get(&url, None, [("locale", "ko_KR")], None)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), r#"{"output": []}"#);
}

#[tokio::test]
async fn test_repeated_logout_is_returned_to_caller() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_login(&server, 2).await;

    Mock::given(method("GET"))
        .and(path(DATA))
        .respond_with(ResponseTemplate::new(200).set_body_string("LOGOUT"))
        .expect(2)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(Arc::new(SessionManager::new(config(&server, &dir, true))));
    let url = format!("{}{}", server.uri(), DATA);
    let response = dispatcher
        .get(&url, None, [("a", "b")], None)
        .await
        .unwrap();

    assert_eq!(response.text().trim(), "LOGOUT");
}

#[tokio::test]
async fn test_unauthenticated_dispatch_without_session_or_auto_login() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_login(&server, 0).await;

    Mock::given(method("GET"))
        .and(path(DATA))
        .respond_with(ResponseTemplate::new(200).set_body_string("public"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = Arc::new(SessionManager::new(config(&server, &dir, true)));
    manager.set_auto_login(false, false);
    let dispatcher = Dispatcher::new(manager.clone());

    let url = format!("{}{}", server.uri(), DATA);
    let response = dispatcher.get(&url, None, [("a", "b")], None).await.unwrap();

    assert_eq!(response.text(), "public");
    assert!(manager.current().is_none());
    assert!(!dir.path().join("session.json").exists());
}

#[tokio::test]
async fn test_duplicate_login_override_end_to_end() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(LANDING))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .and(body_string_contains("skipDup=Y"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"MBR_NO": "M0002"}"#))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"_error_code": "CD011", "_error_message": "duplicate"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = SessionManager::new(config(&server, &dir, true));
    let options = LoginOptions {
        allow_duplicate_login: true,
        ..LoginOptions::default()
    };
    let outcome = manager.login(None, None, &options).await.unwrap();
    assert_eq!(outcome.mbr_no, "M0002");
}

#[tokio::test]
async fn test_duplicate_login_without_override_is_reported() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(LANDING))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"_error_code": "CD011", "_error_message": "duplicate"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = SessionManager::new(config(&server, &dir, true));
    let err = manager
        .login(None, None, &LoginOptions::default())
        .await
        .unwrap_err();

    match err.downcast_ref::<SessionError>() {
        Some(SessionError::AuthenticationFailed(msg)) => {
            assert_eq!(msg, "errorCode=CD011. duplicate")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(manager.current().is_none());
}
