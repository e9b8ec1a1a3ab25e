//! Mock FogBugz JSON API for client tests.
//!
//! Starts an in-process HTTP server answering `cmd=search` and `cmd=edit`
//! against a small case table, recording every request body.

use actix_web::{App, HttpResponse, HttpServer, post, web};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

/// Keys of an edit body that are not case fields.
const CONTROL_KEYS: &[&str] = &["cmd", "token", "ixBug", "cols", "sTags", "sEvent"];

/// Shared state for the mock tracker.
#[derive(Default)]
pub struct MockTrackerState {
    pub cases: BTreeMap<i64, Map<String, Value>>,
    pub requests: Vec<Value>,
    /// Answer the next request with this API error.
    pub fail_next: Option<String>,
    /// Answer edits with a null case.
    pub refuse_edits: bool,
    /// Answer every request with HTTP 500.
    pub unavailable: bool,
}

fn envelope(data: Value) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "data": data, "errors": [] }))
}

#[post("/f/api/0/jsonapi")]
async fn jsonapi(
    state: web::Data<Arc<Mutex<MockTrackerState>>>,
    body: web::Json<Value>,
) -> HttpResponse {
    let mut state = state.lock().unwrap();
    let body = body.into_inner();
    state.requests.push(body.clone());

    if state.unavailable {
        return HttpResponse::InternalServerError().finish();
    }
    if let Some(message) = state.fail_next.take() {
        return HttpResponse::Ok().json(json!({
            "data": {},
            "errors": [{ "message": message }]
        }));
    }

    match body["cmd"].as_str() {
        Some("search") => {
            let wanted = body["q"]
                .as_str()
                .and_then(|q| q.strip_prefix("ixBug:"))
                .and_then(|id| id.parse::<i64>().ok());
            let cases: Vec<Value> = state
                .cases
                .iter()
                .filter(|(id, _)| wanted.is_none_or(|w| **id == w))
                .map(|(_, case)| Value::Object(case.clone()))
                .collect();
            envelope(json!({ "count": cases.len(), "cases": cases }))
        }
        Some("edit") => {
            if state.refuse_edits {
                return envelope(json!({ "case": null }));
            }
            let Some(id) = body["ixBug"].as_i64() else {
                return envelope(json!({ "case": null }));
            };
            let Some(case) = state.cases.get_mut(&id) else {
                return envelope(json!({ "case": null }));
            };

            if let Some(tags) = body["sTags"].as_str() {
                let tags: Vec<Value> = tags
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(Value::from)
                    .collect();
                case.insert("tags".to_string(), Value::Array(tags));
            }
            if let Some(fields) = body.as_object() {
                for (key, value) in fields {
                    if !CONTROL_KEYS.contains(&key.as_str()) {
                        case.insert(key.clone(), value.clone());
                    }
                }
            }
            envelope(json!({ "case": Value::Object(case.clone()) }))
        }
        _ => HttpResponse::Ok().json(json!({
            "data": {},
            "errors": [{ "message": "Unknown command" }]
        })),
    }
}

/// Mock tracker serving the JSON API endpoint.
pub struct MockTrackerServer {
    pub url: String,
    pub state: Arc<Mutex<MockTrackerState>>,
}

impl MockTrackerServer {
    /// Start the mock tracker on an ephemeral port.
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockTrackerState::default()));

        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{}", port);

        let state_data = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state_data.clone()))
                .service(jsonapi)
        })
        .workers(1)
        .listen(listener)
        .expect("failed to listen")
        .disable_signals()
        .run();

        tokio::spawn(server);

        MockTrackerServer { url, state }
    }

    /// Add a case with a milestone and tags.
    pub fn add_case(&self, id: i64, milestone: &str, tags: &[&str]) {
        let mut case = Map::new();
        case.insert("ixBug".to_string(), json!(id));
        case.insert("sTitle".to_string(), json!(format!("Case {}", id)));
        case.insert("sFixFor".to_string(), json!(milestone));
        case.insert("tags".to_string(), json!(tags));
        self.state.lock().unwrap().cases.insert(id, case);
    }

    pub fn set_field(&self, id: i64, name: &str, value: &str) {
        if let Some(case) = self.state.lock().unwrap().cases.get_mut(&id) {
            case.insert(name.to_string(), json!(value));
        }
    }

    pub fn case(&self, id: i64) -> Map<String, Value> {
        self.state.lock().unwrap().cases[&id].clone()
    }

    pub fn requests(&self) -> Vec<Value> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    pub fn refuse_edits(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_edits = refuse;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }
}
