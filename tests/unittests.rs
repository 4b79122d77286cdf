use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use iagram::graph_utils::edge_drop::{on_connect_end, ConnectionState};
use iagram::graph_utils::graph::{ConnectParams, EdgeChange, GraphState, NodeChange, NodeKind, DEFAULT_NODE_ORIGIN};
use iagram::graph_utils::ids::{CorrelationId, EdgeId, IdAllocator, NodeId};
use iagram::graph_utils::view::{Point, PointerEvent, ViewTransform};
use iagram::persistence::persist::{self, SessionFile};
use iagram::persistence::settings::AppSettings;
use iagram::prompt::error::{PipelineError, PipelineResult};
use iagram::prompt::generation::TextGenerator;
use iagram::prompt::history::{Message, MessageHistory, MessageStatus, Role, EMPTY_TRANSCRIPT};
use iagram::prompt::pipeline::{FailurePolicy, PromptPipeline, PromptSession, SubmissionOutcome, SubmissionState};
use iagram::prompt::store::{ItemRecord, ItemStore};

// ---------- fakes ----------

/// Answers from a fixed table; unknown prompts fail.
struct ScriptedGenerator {
    replies: HashMap<String, String>,
}

impl ScriptedGenerator {
    fn new(pairs: &[(&str, &str)]) -> Self {
        Self { replies: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> PipelineResult<String> {
        self.replies
            .get(prompt)
            .cloned()
            .ok_or_else(|| PipelineError::Generation(format!("no reply for {:?}", prompt)))
    }
}

/// Holds each prompt until the test releases its gate.
struct GatedGenerator {
    gates: Mutex<HashMap<String, oneshot::Receiver<String>>>,
}

#[async_trait]
impl TextGenerator for GatedGenerator {
    async fn generate(&self, prompt: &str) -> PipelineResult<String> {
        let gate = self.gates.lock().unwrap().remove(prompt);
        match gate {
            Some(rx) => rx.await.map_err(|e| PipelineError::Generation(e.to_string())),
            None => Err(PipelineError::Generation("no gate".into())),
        }
    }
}

/// Blows up inside the submission task.
struct PanickingGenerator;

#[async_trait]
impl TextGenerator for PanickingGenerator {
    async fn generate(&self, _prompt: &str) -> PipelineResult<String> {
        panic!("generator crashed")
    }
}

#[derive(Clone, Copy)]
enum StoreMode {
    Echo,
    Reject,
    Malformed,
}

struct FakeStore {
    mode: StoreMode,
    saved: Mutex<Vec<ItemRecord>>,
}

impl FakeStore {
    fn new(mode: StoreMode) -> Arc<Self> {
        Arc::new(Self { mode, saved: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl ItemStore for FakeStore {
    async fn save(&self, record: &ItemRecord) -> PipelineResult<ItemRecord> {
        self.saved.lock().unwrap().push(record.clone());
        match self.mode {
            StoreMode::Echo => Ok(record.clone()),
            StoreMode::Reject => Err(PipelineError::Persistence("HTTP 500 Internal Server Error".into())),
            StoreMode::Malformed => Err(PipelineError::Malformed("missing `item`".into())),
        }
    }
}

fn session_with(generator: Arc<dyn TextGenerator>, store: Arc<dyn ItemStore>, policy: FailurePolicy) -> PromptSession {
    PromptSession::new(PromptPipeline::new(generator, store, policy, Handle::current()))
}

fn identity_view() -> ViewTransform {
    ViewTransform::new(Point::new(0.0, 0.0), Point::new(0.0, 0.0), 1.0)
}

fn invalid_from(id: &str) -> ConnectionState {
    ConnectionState { is_valid: false, from_node: NodeId::from(id) }
}

// ---------- ids ----------

#[test]
fn ids_are_unique_and_increasing_across_kinds() {
    let mut ids = IdAllocator::new();
    let mut graph = GraphState::initial();
    let view = identity_view();
    let mut seen: Vec<u64> = Vec::new();

    for i in 0..5 {
        let out = on_connect_end(&mut graph, &mut ids, &view, &PointerEvent::mouse(Point::new(i as f32 * 10.0, 0.0)), &invalid_from("0"))
            .expect("invalid drop creates a node");
        seen.push(out.node.as_str().parse().unwrap());
        let corr = ids.next_correlation_id();
        seen.push(corr.as_str().parse().unwrap());
        let edge = graph
            .connect(ConnectParams { source: out.node.clone(), target: NodeId::from("0") }, &mut ids)
            .expect("fresh link");
        seen.push(edge.as_str().parse().unwrap());
    }

    assert_eq!(seen.first(), Some(&1));
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "ids must strictly increase: {:?}", seen);
}

#[test]
fn allocator_hands_out_previous_value_and_resumes() {
    let mut ids = IdAllocator::new();
    assert_eq!(ids.peek(), 1);
    assert_eq!(ids.next_id(), "1");
    assert_eq!(ids.next_id(), "2");
    assert_eq!(ids.peek(), 3);

    let mut resumed = IdAllocator::resume_from(ids.peek());
    assert_eq!(resumed.next_id(), "3");
    assert_eq!(IdAllocator::resume_from(0).peek(), 1);
}

#[test]
fn catching_up_to_an_older_counter_never_rewinds() {
    let mut live = IdAllocator::resume_from(10);
    live.catch_up(&IdAllocator::resume_from(5));
    assert_eq!(live.peek(), 10);
    assert_eq!(live.next_id(), "10");

    live.catch_up(&IdAllocator::resume_from(20));
    assert_eq!(live.next_id(), "20");
}

// ---------- graph + edge drop ----------

#[test]
fn initial_graph_has_single_input_node() {
    let g = GraphState::initial();
    assert_eq!(g.node_count(), 1);
    assert_eq!(g.edge_count(), 0);
    let n = &g.nodes()[0];
    assert_eq!(n.id, NodeId::from("0"));
    assert_eq!(n.kind, NodeKind::Input);
    assert_eq!(n.position, Point::new(0.0, 50.0));
    assert_eq!(n.label, "Node");
}

#[test]
fn invalid_drop_creates_labelled_node_and_edge() {
    let mut graph = GraphState::initial();
    let mut ids = IdAllocator::new();
    let view = identity_view();

    let out = on_connect_end(&mut graph, &mut ids, &view, &PointerEvent::mouse(Point::new(120.0, 80.0)), &invalid_from("0"))
        .expect("node created");

    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    let node = graph.node(&out.node).unwrap();
    assert_eq!(node.label, "Node 1");
    assert_eq!(node.kind, NodeKind::Default);
    assert_eq!(node.position, Point::new(120.0, 80.0));
    assert_eq!(node.origin, DEFAULT_NODE_ORIGIN);

    let edge = &graph.edges()[0];
    assert_eq!(edge.id, EdgeId::from("1"));
    assert_eq!(edge.source, NodeId::from("0"));
    assert_eq!(edge.target, out.node);
    // node and its incoming edge share one id value
    assert_eq!(out.edge.as_str(), out.node.as_str());
}

#[test]
fn valid_drop_creates_nothing() {
    let mut graph = GraphState::initial();
    let mut ids = IdAllocator::new();
    let before = graph.clone();
    let conn = ConnectionState { is_valid: true, from_node: NodeId::from("0") };

    let out = on_connect_end(&mut graph, &mut ids, &identity_view(), &PointerEvent::mouse(Point::new(5.0, 5.0)), &conn);

    assert!(out.is_none());
    assert_eq!(graph, before);
    assert_eq!(ids.peek(), 1, "no id consumed on a valid drop");
}

#[test]
fn drop_position_goes_through_pan_and_zoom() {
    let mut graph = GraphState::initial();
    let mut ids = IdAllocator::new();
    // screen = (canvas - center) * 2 + center + pan
    let view = ViewTransform::new(Point::new(100.0, 100.0), Point::new(20.0, -10.0), 2.0);
    let screen = view.to_screen_position(Point::new(120.0, 80.0));
    assert_eq!(screen, Point::new(160.0, 50.0));

    let out = on_connect_end(&mut graph, &mut ids, &view, &PointerEvent::mouse(screen), &invalid_from("0")).unwrap();
    assert_eq!(graph.node(&out.node).unwrap().position, Point::new(120.0, 80.0));
}

#[test]
fn touch_release_uses_first_touch_point() {
    let ev = PointerEvent {
        client: Point::new(999.0, 999.0),
        changed_touches: Some(vec![Point::new(30.0, 40.0), Point::new(1.0, 1.0)]),
    };
    assert_eq!(ev.client_position(), Point::new(30.0, 40.0));
    assert_eq!(PointerEvent::mouse(Point::new(7.0, 8.0)).client_position(), Point::new(7.0, 8.0));
}

#[test]
fn zoom_is_clamped() {
    let mut v = ViewTransform::new(Point::default(), Point::default(), 10.0);
    assert_eq!(v.zoom, 2.0);
    v.zoom_by(0.01);
    assert_eq!(v.zoom, 0.25);
}

#[test]
fn non_finite_view_values_fall_back_to_identity() {
    let v = ViewTransform::new(Point::default(), Point::new(f32::NAN, 3.0), f32::NAN);
    assert_eq!(v.zoom, 1.0);
    assert_eq!(v.pan, Point::default());
    let p = v.to_canvas_position(Point::new(12.0, 34.0));
    assert_eq!(p, Point::new(12.0, 34.0));

    let mut z = ViewTransform::new(Point::default(), Point::default(), 1.5);
    z.zoom_by(f32::INFINITY);
    z.zoom_by(0.0);
    assert_eq!(z.zoom, 1.5);

    let snapshot = SessionFile {
        graph: GraphState::initial(),
        history: MessageHistory::new(),
        next_id: 4,
        pan: (0.0, 0.0),
        zoom: f32::NAN,
    };
    let (_g, _h, _i, view) = snapshot.into_runtime();
    assert_eq!(view.zoom, 1.0);
}

#[test]
fn connect_links_existing_nodes_once() {
    let mut graph = GraphState::initial();
    let mut ids = IdAllocator::new();
    let out = on_connect_end(&mut graph, &mut ids, &identity_view(), &PointerEvent::mouse(Point::new(0.0, 200.0)), &invalid_from("0")).unwrap();

    let back = ConnectParams { source: out.node.clone(), target: NodeId::from("0") };
    let eid = graph.connect(back.clone(), &mut ids).expect("new link");
    assert_eq!(eid, EdgeId::from("2"));
    assert!(graph.connect(back, &mut ids).is_none(), "duplicate link ignored");
    assert!(graph
        .connect(ConnectParams { source: NodeId::from("0"), target: NodeId::from("404") }, &mut ids)
        .is_none());
    assert_eq!(graph.edge_count(), 2);
    assert_eq!(ids.peek(), 3);
}

#[test]
fn canvas_deltas_are_applied_verbatim() {
    let mut graph = GraphState::initial();
    let mut ids = IdAllocator::new();
    let out = on_connect_end(&mut graph, &mut ids, &identity_view(), &PointerEvent::mouse(Point::new(0.0, 200.0)), &invalid_from("0")).unwrap();

    graph.apply_node_changes(vec![
        NodeChange::Position { id: NodeId::from("0"), position: Point::new(-40.0, 10.0) },
        NodeChange::Select { id: out.node.clone(), selected: true },
        NodeChange::Position { id: NodeId::from("missing"), position: Point::new(1.0, 1.0) },
    ]);
    graph.apply_edge_changes(vec![EdgeChange::Select { id: out.edge.clone(), selected: true }]);

    assert_eq!(graph.nodes()[0].position, Point::new(-40.0, 10.0));
    assert!(graph.nodes()[1].selected);
    assert!(graph.edges()[0].selected);
    assert_eq!(graph.node_count(), 2);
}

#[test]
fn hit_testing_respects_center_top_origin() {
    let g = GraphState::initial();
    // box spans x in [-75, 75], y in [50, 90]
    assert!(g.node_at(Point::new(0.0, 60.0)).is_some());
    assert!(g.node_at(Point::new(-70.0, 85.0)).is_some());
    assert!(g.node_at(Point::new(0.0, 40.0)).is_none());
    assert!(g.node_at(Point::new(80.0, 60.0)).is_none());
}

// ---------- history ----------

#[test]
fn empty_history_renders_placeholder() {
    let h = MessageHistory::new();
    let lines = h.render();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].text, EMPTY_TRANSCRIPT);
}

#[test]
fn history_status_update_keeps_text_and_order() {
    let mut h = MessageHistory::new();
    h.append(Message::user(CorrelationId::from("1"), "a"));
    h.append(Message::user(CorrelationId::from("2"), "b"));
    assert!(h.set_status(&CorrelationId::from("1"), MessageStatus::Failed));
    assert!(!h.set_status(&CorrelationId::from("9"), MessageStatus::Failed));

    let texts: Vec<&str> = h.entries().iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["a", "b"]);
    assert!(h.render()[0].failed);
    assert!(!h.render()[1].failed);
}

// ---------- pipeline ----------

#[tokio::test]
async fn prompt_resolves_with_shared_correlation_id() {
    let store = FakeStore::new(StoreMode::Echo);
    let mut session = session_with(Arc::new(ScriptedGenerator::new(&[("hello", "hi there")])), store.clone(), FailurePolicy::Silent);
    let mut ids = IdAllocator::new();

    session.input = "hello".into();
    let id = session.submit(&mut ids);

    // optimistic append, input cleared before anything resolves
    assert_eq!(session.input, "");
    assert_eq!(session.history.len(), 1);
    assert_eq!(session.history.entries()[0].text, "hello");
    assert_eq!(session.history.entries()[0].role, Role::User);
    assert_eq!(session.state_of(&id), Some(SubmissionState::Submitted));

    let outcome = session.next_outcome().await;
    assert_eq!(outcome, Some(SubmissionOutcome::Resolved(id.clone())));
    assert_eq!(session.history.len(), 2);
    let reply = &session.history.entries()[1];
    assert_eq!(reply.text, "hi there");
    assert_eq!(reply.role, Role::Response);
    assert_eq!(reply.id, id);
    assert_eq!(session.history.entries()[0].status, MessageStatus::Delivered);
    assert_eq!(session.state_of(&id), Some(SubmissionState::Resolved));

    let saved = store.saved.lock().unwrap().clone();
    assert_eq!(saved, vec![ItemRecord { id: id.to_string(), request: "hello".into(), response: "hi there".into() }]);
}

#[tokio::test]
async fn out_of_order_responses_stay_paired() {
    let (tx_first, rx_first) = oneshot::channel();
    let (tx_second, rx_second) = oneshot::channel();
    let gates = HashMap::from([("first".to_string(), rx_first), ("second".to_string(), rx_second)]);
    let generator = Arc::new(GatedGenerator { gates: Mutex::new(gates) });
    let mut session = session_with(generator, FakeStore::new(StoreMode::Echo), FailurePolicy::Silent);
    let mut ids = IdAllocator::new();

    session.input = "first".into();
    let a = session.submit(&mut ids);
    session.input = "second".into();
    let b = session.submit(&mut ids);
    assert_eq!(session.in_flight(), 2);

    tx_second.send("answer two".into()).unwrap();
    assert_eq!(session.next_outcome().await, Some(SubmissionOutcome::Resolved(b.clone())));
    assert!(matches!(
        session.state_of(&a),
        Some(SubmissionState::Submitted | SubmissionState::AwaitingGeneration)
    ));

    tx_first.send("answer one".into()).unwrap();
    let rest = session.settle().await;
    assert_eq!(rest, vec![SubmissionOutcome::Resolved(a.clone())]);

    let h = &session.history;
    assert_eq!(h.len(), 4);
    let order: Vec<(&str, Role)> = h.entries().iter().map(|m| (m.id.as_str(), m.role)).collect();
    assert_eq!(order, vec![(a.as_str(), Role::User), (b.as_str(), Role::User), (b.as_str(), Role::Response), (a.as_str(), Role::Response)]);
    assert_eq!(h.pair(&a).1.map(|m| m.text.as_str()), Some("answer one"));
    assert_eq!(h.pair(&b).1.map(|m| m.text.as_str()), Some("answer two"));
    assert_eq!(session.in_flight(), 0);
}

#[tokio::test]
async fn rejected_store_leaves_user_entry_alone() {
    let mut session = session_with(
        Arc::new(ScriptedGenerator::new(&[("hello", "hi there")])),
        FakeStore::new(StoreMode::Reject),
        FailurePolicy::Silent,
    );
    let mut ids = IdAllocator::new();
    session.input = "hello".into();
    let id = session.submit(&mut ids);

    assert_eq!(session.next_outcome().await, Some(SubmissionOutcome::Failed(id.clone())));
    assert_eq!(session.history.len(), 1);
    assert!(session.history.response_entry(&id).is_none());
    assert_eq!(session.history.entries()[0].status, MessageStatus::Pending);
    assert_eq!(session.state_of(&id), Some(SubmissionState::Failed));
    assert_eq!(session.next_outcome().await, None);
}

#[tokio::test]
async fn generation_failure_is_marked_when_configured() {
    let store = FakeStore::new(StoreMode::Echo);
    let mut session = session_with(Arc::new(ScriptedGenerator::new(&[])), store.clone(), FailurePolicy::MarkFailed);
    let mut ids = IdAllocator::new();
    session.input = "unanswerable".into();
    let id = session.submit(&mut ids);

    session.settle().await;
    assert_eq!(session.history.len(), 1);
    assert_eq!(session.history.entries()[0].text, "unanswerable");
    assert_eq!(session.history.entries()[0].status, MessageStatus::Failed);
    assert_eq!(session.state_of(&id), Some(SubmissionState::Failed));
    assert!(store.saved.lock().unwrap().is_empty(), "nothing archived when generation fails");
}

#[tokio::test]
async fn malformed_store_reply_appends_nothing() {
    let mut session = session_with(
        Arc::new(ScriptedGenerator::new(&[("q", "a")])),
        FakeStore::new(StoreMode::Malformed),
        FailurePolicy::Silent,
    );
    let mut ids = IdAllocator::new();
    session.input = "q".into();
    let id = session.submit(&mut ids);
    assert_eq!(session.settle().await, vec![SubmissionOutcome::Failed(id)]);
    assert_eq!(session.history.len(), 1);
}

#[tokio::test]
async fn empty_prompt_is_still_sent() {
    let store = FakeStore::new(StoreMode::Echo);
    let mut session = session_with(Arc::new(ScriptedGenerator::new(&[("", "say something")])), store.clone(), FailurePolicy::Silent);
    let mut ids = IdAllocator::new();
    let id = session.submit(&mut ids);
    session.settle().await;
    assert_eq!(session.history.pair(&id).1.map(|m| m.text.as_str()), Some("say something"));
    assert_eq!(store.saved.lock().unwrap()[0].request, "");
}

#[tokio::test]
async fn panicking_task_still_settles_as_failure() {
    let mut session = session_with(Arc::new(PanickingGenerator), FakeStore::new(StoreMode::Echo), FailurePolicy::MarkFailed);
    let mut ids = IdAllocator::new();
    session.input = "boom".into();
    let id = session.submit(&mut ids);

    let outcomes = tokio::time::timeout(Duration::from_secs(5), session.settle())
        .await
        .expect("pipeline settles after a task panic");
    assert_eq!(outcomes, vec![SubmissionOutcome::Failed(id.clone())]);
    assert_eq!(session.in_flight(), 0);
    assert_eq!(session.state_of(&id), Some(SubmissionState::Failed));
    assert_eq!(session.history.entries()[0].status, MessageStatus::Failed);
}

#[tokio::test]
async fn results_for_a_replaced_transcript_are_dropped() {
    let (tx, rx) = oneshot::channel();
    let generator = Arc::new(GatedGenerator { gates: Mutex::new(HashMap::from([("late".to_string(), rx)])) });
    let mut session = session_with(generator, FakeStore::new(StoreMode::Echo), FailurePolicy::Silent);
    let mut ids = IdAllocator::new();
    session.input = "late".into();
    let pending = session.submit(&mut ids);

    // transcript from disk that never saw the pending prompt
    let mut loaded = MessageHistory::new();
    loaded.append(Message::user(CorrelationId::from("40"), "old"));
    loaded.append(Message::response(CorrelationId::from("40"), "older"));
    session.replace_history(loaded.clone());
    ids.catch_up(&IdAllocator::resume_from(41));

    tx.send("too late".into()).unwrap();
    assert_eq!(session.settle().await, vec![SubmissionOutcome::Discarded(pending)]);
    assert_eq!(session.history, loaded);
    assert_eq!(session.in_flight(), 0);

    session.input = "next".into();
    assert_eq!(session.submit(&mut ids).as_str(), "41");
}

#[tokio::test]
async fn graph_and_prompts_share_one_counter() {
    let mut session = session_with(Arc::new(ScriptedGenerator::new(&[("x", "y")])), FakeStore::new(StoreMode::Echo), FailurePolicy::Silent);
    let mut ids = IdAllocator::new();
    let mut graph = GraphState::initial();

    let dropped = on_connect_end(&mut graph, &mut ids, &identity_view(), &PointerEvent::mouse(Point::new(1.0, 1.0)), &invalid_from("0")).unwrap();
    session.input = "x".into();
    let corr = session.submit(&mut ids);
    assert_eq!(dropped.node.as_str(), "1");
    assert_eq!(corr.as_str(), "2");
    session.settle().await;
    assert_eq!(graph.node_count(), 2, "prompt traffic never touches the graph");
}

// ---------- settings + session file ----------

#[test]
fn settings_fill_missing_fields_with_defaults() {
    let s = AppSettings::from_json(r#"{"generation_model":"gemini-2.0-flash","failure_policy":"MarkFailed"}"#).unwrap();
    assert_eq!(s.generation_model, "gemini-2.0-flash");
    assert_eq!(s.failure_policy, FailurePolicy::MarkFailed);
    assert_eq!(s.store_url, "http://localhost:8000");
    assert_eq!(s.api_endpoint(), "127.0.0.1:8000");
    assert!(!s.api_enabled);
    assert_eq!(AppSettings::default().generation_model, "gemini-1.5-flash");
}

#[test]
fn session_file_roundtrips_through_disk() {
    let mut graph = GraphState::initial();
    let mut ids = IdAllocator::new();
    let view = identity_view();
    on_connect_end(&mut graph, &mut ids, &view, &PointerEvent::mouse(Point::new(120.0, 80.0)), &invalid_from("0")).unwrap();
    let mut history = MessageHistory::new();
    let corr = ids.next_correlation_id();
    history.append(Message::user(corr.clone(), "hello"));
    history.append(Message::response(corr, "hi there"));

    let snapshot = SessionFile::from_runtime(&graph, &history, &ids, &view);
    let dir = std::env::temp_dir().join(format!("iagram-test-{}", std::process::id()));
    let path = dir.join("session.ron");
    persist::save_to_path(&snapshot, &path).unwrap();
    let loaded = persist::load_from_path(&path).unwrap();
    let _ = std::fs::remove_dir_all(&dir);

    assert_eq!(loaded, snapshot);
    let (g, h, mut i, _v) = loaded.into_runtime();
    assert_eq!(g, graph);
    assert_eq!(h, history);
    assert_eq!(i.next_id(), "3", "counter resumes after the last issued id");
}

// ---------- item store server ----------

#[cfg(feature = "api")]
mod item_server {
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    use actix_web::dev::ServerHandle;
    use actix_web::http::header;
    use actix_web::{test, web, App, HttpRequest, HttpResponse, HttpServer};
    use iagram::api::server::{build_server, routes, Cfg};
    use iagram::api::ItemArchive;
    use iagram::graph_utils::ids::IdAllocator;
    use iagram::prompt::error::PipelineError;
    use iagram::prompt::pipeline::{FailurePolicy, SubmissionOutcome};
    use iagram::prompt::store::{parse_envelope, HttpItemStore, ItemRecord, ItemStore};

    use super::{session_with, ScriptedGenerator};

    fn cfg() -> web::Data<Cfg> {
        web::Data::new(Cfg { log_dir: std::env::temp_dir().join("iagram-test-logs") })
    }

    #[actix_web::test]
    async fn post_echoes_item_the_client_can_read() {
        let archive = web::Data::new(ItemArchive::new());
        let app = test::init_service(App::new().app_data(cfg()).app_data(archive.clone()).configure(routes)).await;

        let record = ItemRecord { id: "1".into(), request: "hello".into(), response: "hi there".into() };
        let req = test::TestRequest::post().uri("/items/").set_json(&record).to_request();
        let body = test::call_and_read_body(&app, req).await;
        let echoed = parse_envelope(std::str::from_utf8(&body).unwrap()).unwrap();
        assert_eq!(echoed, record);
        assert_eq!(archive.len(), 1);

        let req = test::TestRequest::get().uri("/items/1").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get().uri("/items/").to_request();
        let list: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list["items"].as_array().map(|a| a.len()), Some(1));
    }

    #[actix_web::test]
    async fn unknown_item_and_bad_body_are_rejected() {
        let app = test::init_service(App::new().app_data(cfg()).app_data(web::Data::new(ItemArchive::new())).configure(routes)).await;

        let req = test::TestRequest::get().uri("/items/42").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 404);

        let req = test::TestRequest::post()
            .uri("/items/")
            .set_json(serde_json::json!({ "id": "1" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
    }

    async fn spawn_store(archive: web::Data<ItemArchive>) -> (String, ServerHandle) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = build_server(Cfg { log_dir: std::env::temp_dir().join("iagram-test-logs") }, archive, listener).unwrap();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (format!("http://{}", addr), handle)
    }

    /// Store that answers every POST with a 500 and remembers the request's content type.
    async fn spawn_failing_store() -> (String, ServerHandle, Arc<Mutex<Option<String>>>) {
        let seen = Arc::new(Mutex::new(None));
        let seen_srv = seen.clone();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = HttpServer::new(move || {
            let seen = seen_srv.clone();
            App::new().route(
                "/items/",
                web::post().to(move |req: HttpRequest| {
                    let seen = seen.clone();
                    async move {
                        let ct = req.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
                        *seen.lock().unwrap() = ct;
                        HttpResponse::InternalServerError().finish()
                    }
                }),
            )
        })
        .workers(1)
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (format!("http://{}", addr), handle, seen)
    }

    #[actix_web::test]
    async fn http_store_saves_through_item_routes() {
        let archive = web::Data::new(ItemArchive::new());
        let (url, handle) = spawn_store(archive.clone()).await;

        let record = ItemRecord { id: "7".into(), request: "hello".into(), response: "hi there".into() };
        let stored = HttpItemStore::new(format!("{}/", url)).save(&record).await.unwrap();
        assert_eq!(stored, record);
        assert_eq!(archive.get("7"), Some(record));

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn http_store_turns_server_error_into_persistence_failure() {
        let (url, handle, seen) = spawn_failing_store().await;

        let record = ItemRecord { id: "1".into(), request: "hello".into(), response: "hi there".into() };
        let err = HttpItemStore::new(url.clone()).save(&record).await.unwrap_err();
        assert!(matches!(&err, PipelineError::Persistence(m) if m.contains("500")), "got {:?}", err);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("application/json"));

        // same failure end to end: only the user entry remains
        let mut session = session_with(
            Arc::new(ScriptedGenerator::new(&[("hello", "hi there")])),
            Arc::new(HttpItemStore::new(url)),
            FailurePolicy::Silent,
        );
        let mut ids = IdAllocator::new();
        session.input = "hello".into();
        let id = session.submit(&mut ids);
        assert_eq!(session.settle().await, vec![SubmissionOutcome::Failed(id.clone())]);
        assert_eq!(session.history.len(), 1);
        assert!(session.history.response_entry(&id).is_none());

        handle.stop(true).await;
    }

    #[::core::prelude::v1::test]
    fn reposting_an_id_replaces_in_place() {
        let archive = ItemArchive::new();
        archive.upsert(ItemRecord { id: "1".into(), request: "a".into(), response: "x".into() });
        archive.upsert(ItemRecord { id: "2".into(), request: "b".into(), response: "y".into() });
        archive.upsert(ItemRecord { id: "1".into(), request: "a".into(), response: "z".into() });
        let ids: Vec<String> = archive.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(archive.get("1").map(|r| r.response), Some("z".to_string()));
    }
}
