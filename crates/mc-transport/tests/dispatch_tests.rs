//! Dispatch protocol tests: the REST router driven against a scripted engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use mc_protocol::{
    EngineError, EngineResult, ExecutionContext, FieldDescriptor, Handler, HandlerResponse,
    LogLevel, LogSubSystem,
};
use mc_transport::{MAX_FORM_MEMORY, RestServer, TransportConfig, rest_router};
use parking_lot::Mutex;
use tower::ServiceExt;

// ─────────────────────────────────────────────────────────────────────────────
// Scripted engine
// ─────────────────────────────────────────────────────────────────────────────

/// What a handler saw while being driven by the dispatcher.
#[derive(Debug, Default)]
struct Calls {
    descriptors: Vec<u32>,
    files: Vec<(String, Vec<u8>)>,
    scalars: Vec<(String, String)>,
    handled_with: Option<Vec<u8>>,
}

#[derive(Clone)]
struct Script {
    raw_body: bool,
    form: bool,
    fields: Vec<FieldDescriptor>,
    response: HandlerResponse,
    payload: Vec<u8>,
    handle_error: Option<EngineError>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            raw_body: false,
            form: false,
            fields: Vec::new(),
            response: HandlerResponse::ok("application/json"),
            payload: b"{}".to_vec(),
            handle_error: None,
        }
    }
}

struct ScriptedHandler {
    script: Script,
    calls: Arc<Mutex<Calls>>,
    handled: bool,
}

impl Handler for ScriptedHandler {
    fn expects_raw_body(&self) -> EngineResult<bool> {
        Ok(self.script.raw_body)
    }

    fn expects_form_data(&self) -> EngineResult<(u32, bool)> {
        Ok((self.script.fields.len() as u32, self.script.form))
    }

    fn field_descriptor(&self, index: u32) -> EngineResult<FieldDescriptor> {
        self.calls.lock().descriptors.push(index);
        self.script
            .fields
            .get(index as usize)
            .cloned()
            .ok_or_else(|| EngineError::invalid_param(format!("field index {index}")))
    }

    fn set_file_field(&mut self, name: &str, data: Vec<u8>) -> EngineResult<()> {
        self.calls.lock().files.push((name.to_string(), data));
        Ok(())
    }

    fn set_scalar_field(&mut self, name: &str, value: &str) -> EngineResult<()> {
        self.calls
            .lock()
            .scalars
            .push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn handle(&mut self, raw_body: &[u8]) -> EngineResult<HandlerResponse> {
        self.calls.lock().handled_with = Some(raw_body.to_vec());
        if let Some(err) = self.script.handle_error.clone() {
            return Err(err);
        }
        self.handled = true;
        Ok(self.script.response.clone())
    }

    fn result_payload(&self) -> EngineResult<Vec<u8>> {
        if !self.handled {
            return Err(EngineError::new("request not handled"));
        }
        Ok(self.script.payload.clone())
    }
}

struct ScriptedContext {
    script: Script,
    create_error: Option<EngineError>,
    calls: Arc<Mutex<Calls>>,
    created: AtomicUsize,
    last_request: Mutex<Option<(String, String, String)>>,
    logs: Mutex<Vec<(String, LogSubSystem, LogLevel)>>,
}

impl ScriptedContext {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            create_error: None,
            calls: Arc::new(Mutex::new(Calls::default())),
            created: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            logs: Mutex::new(Vec::new()),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Script::default(),
            create_error: Some(EngineError::new(message)),
            calls: Arc::new(Mutex::new(Calls::default())),
            created: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            logs: Mutex::new(Vec::new()),
        })
    }
}

impl ExecutionContext for ScriptedContext {
    fn register_library(
        &self,
        _name: &str,
        _binary_path: &std::path::Path,
        _resource_path: Option<&std::path::Path>,
    ) -> EngineResult<()> {
        Ok(())
    }

    fn parse_configuration(&self, _xml: &str) -> EngineResult<()> {
        Ok(())
    }

    fn load_client_bundle(&self, _path: &std::path::Path) -> EngineResult<()> {
        Ok(())
    }

    fn start_all_threads(&self) -> EngineResult<()> {
        Ok(())
    }

    fn terminate_all_threads(&self) -> EngineResult<()> {
        Ok(())
    }

    fn log(&self, message: &str, subsystem: LogSubSystem, level: LogLevel) {
        self.logs.lock().push((message.to_string(), subsystem, level));
    }

    fn create_handler(
        &self,
        path: &str,
        method: &str,
        authorization: &str,
    ) -> EngineResult<Box<dyn Handler>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() =
            Some((path.to_string(), method.to_string(), authorization.to_string()));
        if let Some(err) = &self.create_error {
            return Err(err.clone());
        }
        Ok(Box::new(ScriptedHandler {
            script: self.script.clone(),
            calls: self.calls.clone(),
            handled: false,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn send(
    context: Arc<ScriptedContext>,
    request: Request<Body>,
) -> (StatusCode, header::HeaderMap, String) {
    let response = rest_router(context).oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8_lossy(&body).into_owned())
}

const BOUNDARY: &str = "mc-test-boundary";

enum Part<'a> {
    Value(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_request(path: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Value(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; \
                         filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn form_script(fields: Vec<FieldDescriptor>) -> Script {
    Script {
        form: true,
        fields,
        ..Script::default()
    }
}

fn assert_cors_headers(headers: &header::HeaderMap) {
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "*");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
}

// ─────────────────────────────────────────────────────────────────────────────
// Preflight and plain requests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn options_short_circuits_without_handler() {
    for path in ["/", "/api/build", "/some/deep/path?x=1"] {
        let context = ScriptedContext::new(Script::default());
        let request = Request::options(path).body(Body::empty()).unwrap();
        let (status, headers, body) = send(context.clone(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_cors_headers(&headers);
        assert_eq!(context.created.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn get_returns_handler_content_type_and_payload() {
    let context = ScriptedContext::new(Script::default());
    let request = Request::get("/api/anything").body(Body::empty()).unwrap();
    let (status, headers, body) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(body, "{}");
    assert_cors_headers(&headers);

    let calls = context.calls.lock();
    assert_eq!(calls.handled_with.as_deref(), Some(&b""[..]));
}

#[tokio::test]
async fn path_method_and_authorization_reach_the_engine() {
    let context = ScriptedContext::new(Script::default());
    let request = Request::put("/api/job/42?verbose=1")
        .header(header::AUTHORIZATION, "Bearer abc")
        .body(Body::empty())
        .unwrap();
    send(context.clone(), request).await;

    let last = context.last_request.lock().clone().unwrap();
    assert_eq!(last, ("/api/job/42".into(), "PUT".into(), "Bearer abc".into()));
}

#[tokio::test]
async fn missing_authorization_is_empty() {
    let context = ScriptedContext::new(Script::default());
    let request = Request::get("/").body(Body::empty()).unwrap();
    send(context.clone(), request).await;

    let last = context.last_request.lock().clone().unwrap();
    assert_eq!(last.2, "");
}

#[tokio::test]
async fn raw_body_is_passed_to_handle() {
    let context = ScriptedContext::new(Script {
        raw_body: true,
        ..Script::default()
    });
    let request = Request::post("/api/raw")
        .body(Body::from(&b"\x00\x01binary"[..]))
        .unwrap();
    let (status, _, _) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        context.calls.lock().handled_with.as_deref(),
        Some(&b"\x00\x01binary"[..])
    );
}

#[tokio::test]
async fn body_is_ignored_when_not_expected() {
    let context = ScriptedContext::new(Script::default());
    let request = Request::post("/api/raw").body(Body::from("ignored")).unwrap();
    send(context.clone(), request).await;

    assert_eq!(context.calls.lock().handled_with.as_deref(), Some(&b""[..]));
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler status and errors
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn non_200_status_returns_plain_text_payload() {
    let context = ScriptedContext::new(Script {
        response: HandlerResponse::new("application/json", 404),
        payload: b"build not found".to_vec(),
        ..Script::default()
    });
    let request = Request::get("/api/build/7").body(Body::empty()).unwrap();
    let (status, headers, body) = send(context, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(body, "build not found\n");
    assert_cors_headers(&headers);
}

#[tokio::test]
async fn handler_creation_failure_is_500_and_logged_on_network() {
    let context = ScriptedContext::failing("unauthorized");
    let request = Request::get("/api/secret").body(Body::empty()).unwrap();
    let (status, headers, body) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("Internal Server Error: "));
    assert!(body.contains("unauthorized"));
    assert_cors_headers(&headers);

    let logs = context.logs.lock();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].1, LogSubSystem::Network);
    assert!(logs[0].0.contains("/api/secret"));
    assert!(logs[0].0.contains("unauthorized"));
}

#[tokio::test]
async fn handle_failure_is_500_with_message() {
    let context = ScriptedContext::new(Script {
        handle_error: Some(EngineError::with_code(12, "state machine not running")),
        ..Script::default()
    });
    let request = Request::get("/api/start").body(Body::empty()).unwrap();
    let (status, _, body) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("state machine not running"));
    assert_eq!(context.logs.lock().len(), 1);
}

#[tokio::test]
async fn invalid_handler_status_is_500() {
    let context = ScriptedContext::new(Script {
        response: HandlerResponse::new("text/plain", 7),
        ..Script::default()
    });
    let request = Request::get("/").body(Body::empty()).unwrap();
    let (status, _, body) = send(context, request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("invalid HTTP status code"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Form binding
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn file_and_scalar_fields_are_bound() {
    let context = ScriptedContext::new(form_script(vec![
        FieldDescriptor::file("data", true),
        FieldDescriptor::scalar("name", false),
    ]));
    let request = multipart_request(
        "/api/upload",
        &[Part::Value("name", "layer-1"), Part::File("data", "a.bin", b"\x01\x02\x03")],
    );
    let (status, _, _) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    let calls = context.calls.lock();
    assert_eq!(calls.files, vec![("data".to_string(), vec![1, 2, 3])]);
    assert_eq!(calls.scalars, vec![("name".to_string(), "layer-1".to_string())]);
    assert!(calls.handled_with.is_some());
}

#[tokio::test]
async fn missing_mandatory_file_aborts_binding() {
    let context = ScriptedContext::new(form_script(vec![
        FieldDescriptor::scalar("name", false),
        FieldDescriptor::file("data", true),
        FieldDescriptor::scalar("comment", false),
    ]));
    let request = multipart_request(
        "/api/upload",
        &[Part::Value("name", "job"), Part::Value("comment", "never bound")],
    );
    let (status, _, body) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("no such file in form: data"));

    let calls = context.calls.lock();
    assert_eq!(calls.descriptors, vec![0, 1]);
    assert_eq!(calls.scalars, vec![("name".to_string(), "job".to_string())]);
    assert!(calls.handled_with.is_none());
}

#[tokio::test]
async fn missing_optional_file_still_invokes_handler() {
    let context = ScriptedContext::new(form_script(vec![
        FieldDescriptor::file("preview", false),
        FieldDescriptor::scalar("name", false),
    ]));
    let request = multipart_request("/api/upload", &[Part::Value("name", "job")]);
    let (status, _, body) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "{}");
    let calls = context.calls.lock();
    assert_eq!(calls.descriptors, vec![0, 1]);
    assert!(calls.files.is_empty());
    assert!(calls.handled_with.is_some());
}

#[tokio::test]
async fn blank_file_input_counts_as_missing_mandatory_file() {
    let context = ScriptedContext::new(form_script(vec![FieldDescriptor::file("data", true)]));
    let request = multipart_request("/api/upload", &[Part::File("data", "", b"")]);
    let (status, _, body) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal Server Error: no such file in form: data\n");
    let calls = context.calls.lock();
    assert!(calls.files.is_empty());
    assert!(calls.handled_with.is_none());
}

#[tokio::test]
async fn blank_file_input_skips_optional_file() {
    let context = ScriptedContext::new(form_script(vec![
        FieldDescriptor::file("preview", false),
        FieldDescriptor::scalar("name", false),
    ]));
    let request = multipart_request(
        "/api/upload",
        &[Part::File("preview", "", b""), Part::Value("name", "job")],
    );
    let (status, _, body) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "{}");
    let calls = context.calls.lock();
    assert!(calls.files.is_empty());
    assert_eq!(calls.scalars, vec![("name".to_string(), "job".to_string())]);
    assert!(calls.handled_with.is_some());
}

#[tokio::test]
async fn upload_larger_than_form_memory_is_bound() {
    let context = ScriptedContext::new(form_script(vec![FieldDescriptor::file("data", true)]));
    let mut large = vec![0xAB_u8; MAX_FORM_MEMORY + 1024 * 1024];
    large[0] = 0x01;
    if let Some(last) = large.last_mut() {
        *last = 0x02;
    }
    let request = multipart_request("/api/upload", &[Part::File("data", "build.zip", &large)]);
    let (status, _, body) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    let calls = context.calls.lock();
    assert_eq!(calls.files.len(), 1);
    assert_eq!(calls.files[0].0, "data");
    assert!(calls.files[0].1 == large);
    assert!(calls.handled_with.is_some());
}

#[tokio::test]
async fn empty_scalar_is_not_bound() {
    let context = ScriptedContext::new(form_script(vec![FieldDescriptor::scalar("name", true)]));
    let request = multipart_request("/api/job", &[Part::Value("name", "")]);
    let (status, _, _) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(context.calls.lock().scalars.is_empty());
}

#[tokio::test]
async fn non_empty_scalar_is_bound_once() {
    let context = ScriptedContext::new(form_script(vec![FieldDescriptor::scalar("name", true)]));
    let request = multipart_request(
        "/api/job",
        &[Part::Value("name", "first"), Part::Value("name", "second")],
    );
    send(context.clone(), request).await;

    assert_eq!(
        context.calls.lock().scalars,
        vec![("name".to_string(), "first".to_string())]
    );
}

#[tokio::test]
async fn urlencoded_form_is_bound() {
    let context = ScriptedContext::new(form_script(vec![
        FieldDescriptor::scalar("name", false),
        FieldDescriptor::scalar("mode", false),
    ]));
    let request = Request::post("/api/job?mode=dry")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("name=part+7"))
        .unwrap();
    let (status, _, _) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        context.calls.lock().scalars,
        vec![
            ("name".to_string(), "part 7".to_string()),
            ("mode".to_string(), "dry".to_string()),
        ]
    );
}

#[tokio::test]
async fn non_form_body_is_500_when_form_expected() {
    let context = ScriptedContext::new(form_script(vec![FieldDescriptor::scalar("name", false)]));
    let request = Request::post("/api/job")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _, body) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("multipart/form-data"));
    assert!(context.calls.lock().handled_with.is_none());
}

#[tokio::test]
async fn field_count_without_form_flag_skips_binding() {
    let context = ScriptedContext::new(Script {
        fields: vec![FieldDescriptor::file("data", true)],
        form: false,
        ..Script::default()
    });
    let request = Request::get("/api/job").body(Body::empty()).unwrap();
    let (status, _, _) = send(context.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(context.calls.lock().descriptors.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Listener
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn listener_logs_configured_endpoint() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let context = ScriptedContext::new(Script::default());
    let config = TransportConfig {
        hostname: "localhost".into(),
        port,
    };

    let server = RestServer::bind(&config, context.clone()).await.unwrap();
    assert_eq!(server.local_addr().port(), port);
    server.serve_until(std::future::ready(())).await.unwrap();

    let logs = context.logs.lock();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].0, format!("Listening on localhost:{port}"));
    assert_eq!(logs[0].1, LogSubSystem::Network);
}
