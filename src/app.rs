use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use handlebars::Handlebars;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::explorer::Explorer;
use crate::flow::{FlowController, UploadView, View, VisualizeView};
use crate::loader::UploadedFile;
use crate::relay::{self, RelayClient, RelayOutcome, RelayPolicy};
use crate::session::{MemorySessionStore, Notice, Session, SessionStore};

pub const SESSION_COOKIE: &str = "session";

const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Errors that end a request with a 500 page.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("could not render page: {0}")]
    Template(#[from] handlebars::RenderError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(error = %self, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!("<h1>Internal error</h1><p>{}</p>", self)),
        )
            .into_response()
    }
}

pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub flow: FlowController,
    pub relay: Option<RelayClient>,
    templates: Handlebars<'static>,
}

impl AppState {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let relay = match settings.relay_policy() {
            RelayPolicy::Disabled => None,
            policy => {
                let client = RelayClient::new(settings.relay.url.clone(), settings.relay_timeout())?;
                info!(url = %client.url(), ?policy, "forwarding uploads to relay");
                Some(client)
            }
        };
        let flow = FlowController::new(settings.preview_options(), settings.explorer(), settings.relay_policy());
        Self::with_parts(Arc::new(MemorySessionStore::new(settings.session_ttl())), flow, relay)
    }

    pub fn with_parts(
        sessions: Arc<dyn SessionStore>,
        flow: FlowController,
        relay: Option<RelayClient>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            sessions,
            flow,
            relay,
            templates: templates()?,
        })
    }
}

fn templates() -> Result<Handlebars<'static>, handlebars::TemplateError> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(false);
    hb.register_template_string("upload", include_str!("./static/upload.html"))?;
    hb.register_template_string("explorer", include_str!("./static/explorer.html"))?;
    Ok(hb)
}

/// Start the relay (when enabled) and serve the app until the process exits.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    if settings.relay.enabled {
        let bind = settings.relay.bind.clone();
        let mode = settings.relay_mode();
        let body_limit = settings.max_upload_bytes;
        tokio::spawn(async move {
            if let Err(e) = relay::serve(&bind, mode, body_limit).await {
                error!(%bind, error = %e, "relay service stopped");
            }
        });
    }

    let state = Arc::new(AppState::new(&settings)?);

    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                info!(purged, "expired sessions removed");
            }
        }
    });

    let app = build_router(state, settings.max_upload_bytes);

    let listener = TcpListener::bind(&settings.bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/proceed", post(proceed))
        .route("/back", post(go_back))
        .route("/api/explorer", get(explorer_spec))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the caller's session, creating one (and its cookie) when the
/// cookie is missing or stale.
fn session_for(state: &AppState, jar: CookieJar) -> (CookieJar, String, Session) {
    let existing = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    if let Some(id) = existing {
        if let Some(session) = state.sessions.get(&id) {
            return (jar, id, session);
        }
    }

    let id = state.sessions.create();
    let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    let session = state.sessions.get(&id).unwrap_or_default();
    (jar.add(cookie), id, session)
}

fn save(state: &AppState, id: &str, session: Session) {
    if !state.sessions.put(id, session) {
        warn!(session = %id, "session vanished before it could be saved");
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn index(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<(CookieJar, Html<String>), AppError> {
    let (jar, id, mut session) = session_for(&state, jar);
    let view = state.flow.render(&mut session);
    save(&state, &id, session);

    let page = match &view {
        View::Upload(v) => state.templates.render("upload", &upload_page(v))?,
        View::Visualize(v) => state.templates.render("explorer", &explorer_page(v))?,
    };
    Ok((jar, Html(page)))
}

async fn upload(State(state): State<Arc<AppState>>, jar: CookieJar, multipart: Multipart) -> (CookieJar, Redirect) {
    let (jar, id, mut session) = session_for(&state, jar);

    match read_upload(multipart).await {
        Ok(Some(file)) if session.viewing() => {
            info!(session = %id, file = %file.name, "upload ignored while visualizing");
        }
        Ok(Some(file)) => {
            let outcome = match (&state.relay, state.flow.relay_policy()) {
                (Some(client), policy) if policy != RelayPolicy::Disabled => {
                    let outcome = client.forward(&file).await;
                    // Other requests may have saved this session while the relay answered.
                    if let Some(latest) = state.sessions.get(&id) {
                        session = latest;
                    }
                    outcome
                }
                _ => RelayOutcome::Skipped,
            };
            if let Err(e) = state.flow.upload(&mut session, &file, outcome) {
                info!(session = %id, error = %e, "upload not accepted");
            }
        }
        Ok(None) => session.push_notice(Notice::info("No file selected.")),
        Err(message) => {
            warn!(session = %id, error = %message, "could not read upload");
            session.push_notice(Notice::error(format!("Could not read the upload: {}", message)));
        }
    }

    save(&state, &id, session);
    (jar, Redirect::to("/"))
}

/// Pull the `file` field out of the form. `Ok(None)` means the form was
/// submitted without a file.
async fn read_upload(mut multipart: Multipart) -> Result<Option<UploadedFile>, String> {
    while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| e.body_text())?;

        if name.is_empty() && bytes.is_empty() {
            return Ok(None);
        }
        return Ok(Some(UploadedFile {
            name,
            content_type,
            bytes: bytes.to_vec(),
        }));
    }
    Ok(None)
}

async fn proceed(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    let (jar, id, mut session) = session_for(&state, jar);
    if let Err(e) = state.flow.proceed(&mut session) {
        info!(session = %id, error = %e, "cannot proceed");
    }
    save(&state, &id, session);
    (jar, Redirect::to("/"))
}

async fn go_back(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    let (jar, id, mut session) = session_for(&state, jar);
    state.flow.go_back(&mut session);
    save(&state, &id, session);
    (jar, Redirect::to("/"))
}

/// The explorer description for the caller's dataset, while visualizing.
async fn explorer_spec(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let (jar, _, session) = session_for(&state, jar);

    let dataset = match (session.viewing(), session.dataset()) {
        (true, Some(dataset)) => dataset.clone(),
        _ => {
            return (
                StatusCode::CONFLICT,
                jar,
                Json(json!({ "error": "no dataset is being visualized" })),
            )
                .into_response();
        }
    };

    match state.flow.explorer().prepare(&dataset) {
        Ok(spec) => (jar, Json(spec)).into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            jar,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn notices_json(notices: &[Notice]) -> serde_json::Value {
    notices
        .iter()
        .map(|n| json!({ "level": n.level.as_str(), "message": n.message }))
        .collect()
}

fn upload_page(view: &UploadView) -> serde_json::Value {
    let preview = view.preview.as_ref().map(|p| {
        let numeric = p.numeric_columns();
        let rows: Vec<Vec<serde_json::Value>> = p
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(i, text)| json!({ "text": text, "numeric": numeric.contains(&i) }))
                    .collect()
            })
            .collect();
        json!({
            "columns": p.columns,
            "rows": rows,
            "total_rows": p.total_rows,
            "shown_rows": p.shown_rows,
            "truncated": p.truncated,
        })
    });

    json!({
        "title": "Data Upload Screen",
        "header": "Upload your data file",
        "label": "Choose a CSV or Excel file",
        "accept": view.accept.join(","),
        "source": view.source,
        "notices": notices_json(&view.notices),
        "preview": preview,
    })
}

fn explorer_page(view: &VisualizeView) -> serde_json::Value {
    // Embedded in a <script> element, so "</" must not appear literally.
    let (spec_json, explorer_error) = match &view.explorer {
        Ok(spec) => match spec.to_json() {
            Ok(raw) => (Some(raw.replace("</", "<\\/")), None),
            Err(e) => (None, Some(e.to_string())),
        },
        Err(message) => (None, Some(message.clone())),
    };

    json!({
        "title": view.title,
        "wide": view.wide,
        "source": view.source,
        "notices": notices_json(&view.notices),
        "spec_json": spec_json,
        "explorer_error": explorer_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::GraphicWalker;
    use crate::preview::PreviewOptions;
    use axum::{body::Body, http::Request, http::header};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    const BOUNDARY: &str = "app-test-boundary";

    fn test_app(policy: RelayPolicy, relay: Option<RelayClient>) -> Router {
        let flow = FlowController::new(PreviewOptions::default(), GraphicWalker::default(), policy);
        let state = AppState::with_parts(Arc::new(MemorySessionStore::default()), flow, relay).expect("state");
        build_router(Arc::new(state), 8 * 1024 * 1024)
    }

    fn session_cookie(response: &Response) -> String {
        response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .expect("session cookie")
            .to_string()
    }

    async fn get(app: &Router, uri: &str, cookie: &str) -> Response {
        let request = Request::get(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .expect("request");
        app.clone().oneshot(request).await.expect("response")
    }

    async fn post_empty(app: &Router, uri: &str, cookie: &str) -> Response {
        let request = Request::post(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .expect("request");
        app.clone().oneshot(request).await.expect("response")
    }

    async fn post_file(app: &Router, cookie: &str, filename: &str, data: &[u8]) -> Response {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::post("/upload")
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .expect("request");
        app.clone().oneshot(request).await.expect("response")
    }

    async fn text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    async fn start(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response);
        let page = text(response).await;
        assert!(page.contains("<h1>Data Upload Screen</h1>"));
        assert!(page.contains("<h2>Upload your data file</h2>"));
        cookie
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = test_app(RelayPolicy::Disabled, None);
        let response = get(&app, "/healthz", "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "ok");
    }

    #[tokio::test]
    async fn upload_proceed_and_go_back() {
        let app = test_app(RelayPolicy::Disabled, None);
        let cookie = start(&app).await;

        let response = post_file(&app, &cookie, "a.csv", b"city,pop\nOslo,709037\nBergen,291940\nTromso,77544\n").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let page = text(get(&app, "/", &cookie).await).await;
        assert!(page.contains("File uploaded successfully!"));
        assert!(page.contains("Here is a preview of your data:"));
        assert_eq!(page.matches("<tr class=\"data-row\">").count(), 3);
        assert!(page.contains("Proceed to Visualization"));

        // Notices are shown once.
        let again = text(get(&app, "/", &cookie).await).await;
        assert!(!again.contains("File uploaded successfully!"));
        assert!(again.contains("Bergen"));

        let response = post_empty(&app, "/proceed", &cookie).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let page = text(get(&app, "/", &cookie).await).await;
        assert!(page.contains("<title>Use Pygwalker In Streamlit</title>"));
        assert!(page.contains("Go Back to Upload"));

        let spec: serde_json::Value =
            serde_json::from_str(&text(get(&app, "/api/explorer", &cookie).await).await).expect("json");
        assert_eq!(spec["data"].as_array().map(Vec::len), Some(3));
        assert_eq!(spec["fields"][1]["semanticType"], "quantitative");

        post_empty(&app, "/back", &cookie).await;
        let page = text(get(&app, "/", &cookie).await).await;
        assert!(page.contains("Upload your data file"));
        assert!(!page.contains("Bergen"));
        assert_eq!(get(&app, "/api/explorer", &cookie).await.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn garbage_xlsx_shows_error_and_stays_on_upload() {
        let app = test_app(RelayPolicy::Disabled, None);
        let cookie = start(&app).await;

        post_file(&app, &cookie, "b.xlsx", b"\x00\x13garbage").await;
        let page = text(get(&app, "/", &cookie).await).await;
        assert!(page.contains("Error loading the file."));
        assert!(!page.contains("Proceed to Visualization"));

        post_empty(&app, "/proceed", &cookie).await;
        let page = text(get(&app, "/", &cookie).await).await;
        assert!(page.contains("Upload a file before proceeding"));
        assert_eq!(get(&app, "/api/explorer", &cookie).await.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let app = test_app(RelayPolicy::Disabled, None);
        let alice = start(&app).await;
        let bob = start(&app).await;
        assert_ne!(alice, bob);

        post_file(&app, &alice, "a.csv", b"x\nsecret-value\n").await;
        let page = text(get(&app, "/", &bob).await).await;
        assert!(!page.contains("secret-value"));
    }

    #[tokio::test]
    async fn unknown_cookie_gets_a_fresh_session() {
        let app = test_app(RelayPolicy::Disabled, None);
        let response = get(&app, "/", "session=not-a-real-id").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_ne!(session_cookie(&response), "session=not-a-real-id");
    }

    #[tokio::test]
    async fn gating_relay_unreachable_never_loads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let client = RelayClient::new(format!("http://{addr}/upload"), Duration::from_secs(5)).expect("client");

        let app = test_app(RelayPolicy::Gating, Some(client));
        let cookie = start(&app).await;
        post_file(&app, &cookie, "a.csv", b"x\n1\n").await;

        let page = text(get(&app, "/", &cookie).await).await;
        assert!(page.contains("Could not relay the file"));
        assert!(!page.contains("Here is a preview of your data:"));
    }

    #[tokio::test]
    async fn advisory_relay_acknowledgement_is_displayed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(relay::serve_on(listener, relay::RelayMode::Echo, 8 * 1024 * 1024));
        let client = RelayClient::new(format!("http://{addr}/upload"), Duration::from_secs(5)).expect("client");

        let app = test_app(RelayPolicy::Advisory, Some(client));
        let cookie = start(&app).await;
        post_file(&app, &cookie, "a.csv", b"x\n1\n").await;

        let page = text(get(&app, "/", &cookie).await).await;
        assert!(page.contains("Relay service received a.csv"));
        assert!(page.contains("File uploaded successfully!"));
    }
    /// A relay that counts requests and, while `hold` is set, answers only
    /// after `release` is notified.
    #[derive(Default)]
    struct HeldRelay {
        hits: AtomicUsize,
        hold: AtomicBool,
        arrived: Notify,
        release: Notify,
    }

    async fn held_relay() -> (Arc<HeldRelay>, RelayClient) {
        let gate = Arc::new(HeldRelay::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let handler_gate = gate.clone();
        let relay_app = Router::new().route(
            "/upload",
            post(move |_body: axum::body::Bytes| {
                let gate = handler_gate.clone();
                async move {
                    gate.hits.fetch_add(1, Ordering::SeqCst);
                    if gate.hold.load(Ordering::SeqCst) {
                        gate.arrived.notify_one();
                        gate.release.notified().await;
                    }
                    Json(json!({ "filename": "relayed.csv" }))
                }
            }),
        );
        tokio::spawn(async move { axum::serve(listener, relay_app).await });

        let client = RelayClient::new(format!("http://{addr}/upload"), Duration::from_secs(30)).expect("client");
        (gate, client)
    }

    #[tokio::test]
    async fn gating_relay_forwards_large_uploads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(relay::serve_on(listener, relay::RelayMode::Echo, 8 * 1024 * 1024));
        let client = RelayClient::new(format!("http://{addr}/upload"), Duration::from_secs(30)).expect("client");

        let mut data = b"note\n".to_vec();
        let line = format!("{}\n", "y".repeat(1023));
        while data.len() < 3 * 1024 * 1024 {
            data.extend_from_slice(line.as_bytes());
        }

        let app = test_app(RelayPolicy::Gating, Some(client));
        let cookie = start(&app).await;
        post_file(&app, &cookie, "big.csv", &data).await;

        let page = text(get(&app, "/", &cookie).await).await;
        assert!(page.contains("File uploaded successfully!"));
        assert!(!page.contains("Could not relay the file"));
    }

    #[tokio::test]
    async fn upload_while_visualizing_skips_the_relay() {
        let (gate, client) = held_relay().await;
        let app = test_app(RelayPolicy::Advisory, Some(client));
        let cookie = start(&app).await;

        post_file(&app, &cookie, "a.csv", b"x\nfirst\n").await;
        post_empty(&app, "/proceed", &cookie).await;
        assert_eq!(gate.hits.load(Ordering::SeqCst), 1);

        post_file(&app, &cookie, "b.csv", b"x\nsecond\n").await;
        assert_eq!(gate.hits.load(Ordering::SeqCst), 1);

        let spec: serde_json::Value =
            serde_json::from_str(&text(get(&app, "/api/explorer", &cookie).await).await).expect("json");
        assert_eq!(spec["data"][0]["x"], "first");
    }

    #[tokio::test]
    async fn actions_during_the_relay_hop_are_not_lost() {
        let (gate, client) = held_relay().await;
        let app = test_app(RelayPolicy::Advisory, Some(client));
        let cookie = start(&app).await;
        post_file(&app, &cookie, "a.csv", b"x\nfirst\n").await;

        gate.hold.store(true, Ordering::SeqCst);
        let pending = tokio::spawn({
            let app = app.clone();
            let cookie = cookie.clone();
            async move { post_file(&app, &cookie, "b.csv", b"x\nsecond\n").await.status() }
        });

        gate.arrived.notified().await;
        assert_eq!(post_empty(&app, "/proceed", &cookie).await.status(), StatusCode::SEE_OTHER);
        gate.release.notify_one();
        assert_eq!(pending.await.expect("join"), StatusCode::SEE_OTHER);

        let page = text(get(&app, "/", &cookie).await).await;
        assert!(page.contains("<title>Use Pygwalker In Streamlit</title>"));
        let spec: serde_json::Value =
            serde_json::from_str(&text(get(&app, "/api/explorer", &cookie).await).await).expect("json");
        assert_eq!(spec["data"][0]["x"], "first");
    }
}
