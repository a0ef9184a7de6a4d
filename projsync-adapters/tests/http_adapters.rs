//! HTTP adapter tests against a canned in-process responder.
//!
//! Each test binds `127.0.0.1:0`, answers a fixed sequence of requests with
//! prepared responses, and hands back the raw requests it saw.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

use projsync_adapters::{signed_api, ApiKeyAdapter, SignedApiAdapter, SourceAdapter, SpreadsheetAdapter};
use projsync_core::config::{
    ApiKeySource, ColumnRole, DefaultTaskConfig, OAuthRefresh, ProjectMembers, SecretRef,
    SignedApiSource, SpreadsheetSource,
};
use projsync_core::{Attributes, ProjectIdentity, SourceId};

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

struct Canned {
    status: u16,
    body: &'static str,
}

fn canned(status: u16, body: &'static str) -> Canned {
    Canned { status, body }
}

/// Serve `responses` in order, one connection each. Returns the base URL and
/// a handle yielding the raw requests (head + body, lower-cased headers).
fn serve(responses: Vec<Canned>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for reply in responses {
            let (mut stream, _) = listener.accept().expect("accept");
            seen.push(read_request(&mut stream));
            let reason = match reply.status {
                200 => "OK",
                201 => "Created",
                409 => "Conflict",
                _ => "Error",
            };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                reply.status,
                reason,
                reply.body.len(),
                reply.body
            );
            stream.write_all(response.as_bytes()).expect("write response");
            stream.flush().expect("flush");
        }
        seen
    });
    (base, handle)
}

fn read_request(stream: &mut std::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk).expect("read");
        assert!(n > 0, "client closed before sending a full request");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).expect("read body");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&buf).to_lowercase()
}

fn api_key_adapter(base: &str) -> ApiKeyAdapter {
    ApiKeyAdapter::from_config(&ApiKeySource {
        id: SourceId::from("finmap"),
        base_url: format!("{base}/"),
        api_key: SecretRef::Literal("k-123".to_string()),
        header: "apiKey".to_string(),
        list_path: "v2/projects".to_string(),
        create_path: "v2/projects".to_string(),
        label_field: "label".to_string(),
        timeout_secs: 5,
    })
    .expect("adapter")
}

fn signed_adapter(base: &str, default_task: Option<DefaultTaskConfig>) -> SignedApiAdapter {
    SignedApiAdapter::from_config(&SignedApiSource {
        id: SourceId::from("worksection"),
        base_url: base.to_string(),
        api_path: "/api/admin/v2/".to_string(),
        secret: SecretRef::Literal("s3cret".to_string()),
        list_action: "get_projects".to_string(),
        create_action: "post_project".to_string(),
        status_filter: Some("active".to_string()),
        members: ProjectMembers {
            user_from: None,
            user_to: None,
            manager: Some("boss@example.com".to_string()),
        },
        default_task,
        timeout_secs: 5,
    })
    .expect("adapter")
}

fn id(s: &str) -> ProjectIdentity {
    ProjectIdentity::from(s)
}

// ---------------------------------------------------------------------------
// API-key adapter
// ---------------------------------------------------------------------------

#[test]
fn api_key_list_sends_key_header_and_reads_labels() {
    let (base, server) = serve(vec![canned(200, r#"[{"id":1,"label":"A"},{"id":2,"label":"B"}]"#)]);
    let read = api_key_adapter(&base).list_identities();
    let requests = server.join().expect("server");

    assert!(read.available);
    assert_eq!(read.identities.len(), 2);
    assert!(requests[0].starts_with("get /v2/projects "));
    assert!(requests[0].contains("apikey: k-123"));
}

#[test]
fn api_key_list_server_error_is_unavailable() {
    let (base, server) = serve(vec![canned(500, r#"{"error":"boom"}"#)]);
    let read = api_key_adapter(&base).list_identities();
    server.join().expect("server");
    assert!(!read.available);
    assert!(read.identities.is_empty());
}

#[test]
fn api_key_list_malformed_payload_is_unavailable() {
    let (base, server) = serve(vec![canned(200, r#"[{'label': 'A'}]"#)]);
    let read = api_key_adapter(&base).list_identities();
    server.join().expect("server");
    assert!(!read.available, "single-quoted JSON must not be patched up");
}

#[test]
fn api_key_create_posts_label_and_requires_201() {
    let (base, server) = serve(vec![
        canned(201, r#"{"id":3,"label":"C"}"#),
        canned(409, r#"{"error":"exists"}"#),
        canned(200, r#"{}"#),
        canned(400, r#"{"error":"bad"}"#),
    ]);
    let adapter = api_key_adapter(&base);
    let attrs = Attributes::new();
    assert!(adapter.create_identity(&id("C"), &attrs));
    assert!(adapter.create_identity(&id("C"), &attrs), "409 counts as already exists");
    assert!(!adapter.create_identity(&id("C"), &attrs), "200 is not the confirmation status");
    assert!(!adapter.create_identity(&id("C"), &attrs));
    let requests = server.join().expect("server");

    assert!(requests[0].starts_with("post /v2/projects "));
    assert!(requests[0].contains(r#"{"label":"c"}"#));
}

// ---------------------------------------------------------------------------
// Signed adapter
// ---------------------------------------------------------------------------

#[test]
fn signed_list_carries_action_hash_and_status_filter() {
    let (base, server) = serve(vec![canned(
        200,
        r#"{"status":"ok","data":[{"id":"1","name":"1204-Kitchen"},{"id":"2","name":"X"}]}"#,
    )]);
    let read = signed_adapter(&base, None).list_identities();
    let requests = server.join().expect("server");

    assert!(read.available);
    assert!(read.identities.contains(&id("1204-Kitchen")));
    let hash = signed_api::sign("", "get_projects", "s3cret");
    assert!(requests[0].starts_with("get /api/admin/v2/?"));
    assert!(requests[0].contains("action=get_projects"));
    assert!(requests[0].contains(&format!("hash={hash}")));
    assert!(requests[0].contains("status=active"));
}

#[test]
fn signed_list_error_envelope_is_unavailable() {
    let (base, server) = serve(vec![canned(200, r#"{"status":"error","message":"Invalid hash"}"#)]);
    let read = signed_adapter(&base, None).list_identities();
    server.join().expect("server");
    assert!(!read.available);
}

#[test]
fn signed_create_adds_default_task_and_subtasks() {
    let (base, server) = serve(vec![
        canned(200, r#"{"status":"ok","data":{"id":7,"name":"1204-Kitchen"}}"#),
        canned(200, r#"{"status":"ok","data":{"id":70}}"#),
        canned(200, r#"{"status":"ok","data":{"id":71}}"#),
    ]);
    let task = DefaultTaskConfig {
        title: "{code}-assembly".to_string(),
        action: "post_task".to_string(),
        subtask_columns: vec!["Estimate".to_string(), "Annex".to_string()],
    };
    let mut attrs = Attributes::new();
    attrs.insert("Estimate".to_string(), "500".to_string());

    let created = signed_adapter(&base, Some(task)).create_identity(&id("1204-Kitchen"), &attrs);
    let requests = server.join().expect("server");

    assert!(created);
    assert_eq!(requests.len(), 3);
    assert!(requests[0].contains("action=post_project"));
    assert!(requests[0].contains("title=1204-kitchen"));
    assert!(requests[0].contains("email_manager=boss%40example.com"));
    assert!(requests[1].contains("action=post_task"));
    assert!(requests[1].contains("id_project=7"));
    assert!(requests[1].contains("title=1204-assembly"));
    assert!(requests[2].contains("id_parent=70"));
}

#[test]
fn signed_create_survives_task_failure() {
    let (base, server) = serve(vec![
        canned(200, r#"{"status":"ok","data":{"id":8}}"#),
        canned(200, r#"{"status":"error","message":"no rights"}"#),
    ]);
    let task = DefaultTaskConfig {
        title: "{code}".to_string(),
        action: "post_task".to_string(),
        subtask_columns: vec![],
    };
    let created = signed_adapter(&base, Some(task)).create_identity(&id("99-Shed"), &Attributes::new());
    server.join().expect("server");
    assert!(created, "project exists remotely even though the task failed");
}

#[test]
fn signed_create_error_envelope_is_failure() {
    let (base, server) = serve(vec![canned(200, r#"{"status":"error","message":"limit"}"#)]);
    let created = signed_adapter(&base, None).create_identity(&id("X"), &Attributes::new());
    server.join().expect("server");
    assert!(!created);
}

// ---------------------------------------------------------------------------
// Spreadsheet adapter
// ---------------------------------------------------------------------------

#[test]
fn spreadsheet_reads_rows_with_bearer_token() {
    let (base, server) = serve(vec![canned(
        200,
        r#"{"range":"Projects!A1:C3","majorDimension":"ROWS","values":[["Project","Estimate","Link"],["1204-Kitchen","500","http://x"],["1300-Bath"]]}"#,
    )]);
    let mut columns = BTreeMap::new();
    columns.insert("Project".to_string(), ColumnRole::Identity);
    columns.insert("Link".to_string(), ColumnRole::Ignore);
    let adapter = SpreadsheetAdapter::from_config(&SpreadsheetSource {
        id: SourceId::from("sheet"),
        base_url: base.clone(),
        spreadsheet_id: "sheet1".to_string(),
        range: "Projects!A:N".to_string(),
        access_token: Some(SecretRef::Literal("tok".to_string())),
        api_key: None,
        oauth: None,
        columns,
        timeout_secs: 5,
    })
    .expect("adapter");

    let read = adapter.list_identities();
    let requests = server.join().expect("server");

    assert!(read.available);
    assert!(!adapter.writable());
    assert_eq!(read.identities.len(), 2);
    let attrs = &read.attributes[&id("1204-Kitchen")];
    assert_eq!(attrs.get("Estimate").map(String::as_str), Some("500"));
    assert!(!attrs.contains_key("Link"));
    assert!(requests[0].starts_with("get /spreadsheets/sheet1/values/"));
    assert!(requests[0].contains("authorization: bearer tok"));
}

const SHEET: &str = r#"{"values":[["Project"],["1204-Kitchen"]]}"#;
const TOKEN_1: &str = r#"{"access_token":"at-1","expires_in":3599,"token_type":"Bearer"}"#;
const TOKEN_2: &str = r#"{"access_token":"at-2","expires_in":3599,"token_type":"Bearer"}"#;

fn oauth_sheet(base: &str) -> SpreadsheetAdapter {
    SpreadsheetAdapter::from_config(&SpreadsheetSource {
        id: SourceId::from("sheet"),
        base_url: base.to_string(),
        spreadsheet_id: "sheet1".to_string(),
        range: "Projects!A:N".to_string(),
        access_token: None,
        api_key: None,
        oauth: Some(OAuthRefresh {
            client_id: SecretRef::Literal("cid".to_string()),
            client_secret: SecretRef::Literal("csecret".to_string()),
            refresh_token: SecretRef::Literal("rtok".to_string()),
            token_url: format!("{base}/token"),
        }),
        columns: BTreeMap::new(),
        timeout_secs: 5,
    })
    .expect("adapter")
}

#[test]
fn spreadsheet_exchanges_refresh_token_and_reuses_access_token() {
    let (base, server) = serve(vec![canned(200, TOKEN_1), canned(200, SHEET), canned(200, SHEET)]);
    let adapter = oauth_sheet(&base);

    let first = adapter.list_identities();
    let second = adapter.list_identities();
    let requests = server.join().expect("server");

    assert!(first.available && second.available);
    assert!(first.identities.contains(&id("1204-Kitchen")));
    assert_eq!(requests.len(), 3, "one exchange serves both reads");
    assert!(requests[0].starts_with("post /token"));
    assert!(requests[0].contains("application/x-www-form-urlencoded"));
    assert!(requests[0].contains("grant_type=refresh_token"));
    assert!(requests[0].contains("client_id=cid"));
    assert!(requests[0].contains("refresh_token=rtok"));
    for sheet_request in &requests[1..] {
        assert!(sheet_request.starts_with("get /spreadsheets/sheet1/values/"));
        assert!(sheet_request.contains("authorization: bearer at-1"));
    }
}

#[test]
fn spreadsheet_refreshes_once_when_the_token_is_rejected() {
    let (base, server) = serve(vec![
        canned(200, TOKEN_1),
        canned(401, r#"{"error":{"code":401,"status":"UNAUTHENTICATED"}}"#),
        canned(200, TOKEN_2),
        canned(200, SHEET),
    ]);
    let adapter = oauth_sheet(&base);

    let read = adapter.list_identities();
    let requests = server.join().expect("server");

    assert!(read.available);
    assert_eq!(read.identities.len(), 1);
    assert!(requests[1].contains("authorization: bearer at-1"));
    assert!(requests[2].starts_with("post /token"));
    assert!(requests[3].contains("authorization: bearer at-2"));
}

#[test]
fn spreadsheet_is_unavailable_when_the_refreshed_token_is_rejected_too() {
    let (base, server) = serve(vec![
        canned(200, TOKEN_1),
        canned(401, "{}"),
        canned(200, TOKEN_2),
        canned(401, "{}"),
    ]);
    let adapter = oauth_sheet(&base);

    let read = adapter.list_identities();
    let requests = server.join().expect("server");

    assert!(!read.available);
    assert_eq!(requests.len(), 4, "no second retry");
}

#[test]
fn spreadsheet_is_unavailable_when_the_token_exchange_fails() {
    let (base, server) = serve(vec![canned(400, r#"{"error":"invalid_grant"}"#)]);
    let adapter = oauth_sheet(&base);

    let read = adapter.list_identities();
    let requests = server.join().expect("server");

    assert!(!read.available);
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("post /token"));
}
