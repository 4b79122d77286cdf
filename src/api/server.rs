//! Actix-web item store for archived prompt/response pairs (feature-gated)

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use serde_json::json;
use tokio::runtime::Runtime;

use super::ItemArchive;
use crate::persistence::settings::AppSettings;
use crate::prompt::store::{ItemEnvelope, ItemRecord};

// Store server state for stop/restart
struct ServerState {
    handle: Option<actix_web::dev::ServerHandle>,
    runtime: Option<Runtime>,
}

static SERVER_STATE: once_cell::sync::Lazy<Arc<Mutex<ServerState>>> = once_cell::sync::Lazy::new(|| {
    Arc::new(Mutex::new(ServerState { handle: None, runtime: None }))
});

#[derive(Clone)]
pub struct Cfg {
    pub log_dir: PathBuf,
}

fn log_line(dir: &Path, line: &str) {
    use std::io::Write;
    let now = time::OffsetDateTime::now_utc();
    let date = time::macros::format_description!("[year][month][day]");
    let ts = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let fname = match now.format(&date) { Ok(s) => format!("items_{}.log", s), Err(_) => "items.log".to_string() };
    let path = dir.join(fname);
    let _ = std::fs::create_dir_all(dir);
    let ts_s = now.format(&ts).unwrap_or_else(|_| String::new());
    let msg = format!("{} | {}\n", ts_s, line);
    if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        let _ = f.write_all(msg.as_bytes());
    }
}

fn peer(req: &HttpRequest) -> String {
    req.peer_addr().map(|a| a.to_string()).unwrap_or_else(|| "unknown".into())
}

async fn create_item(
    cfg: web::Data<Cfg>,
    archive: web::Data<ItemArchive>,
    req: HttpRequest,
    body: web::Json<ItemRecord>,
) -> impl Responder {
    let record = body.into_inner();
    log_line(&cfg.log_dir, &format!("POST /items/ id={} from {} qlen={} rlen={}", record.id, peer(&req), record.request.len(), record.response.len()));
    let item = archive.upsert(record);
    HttpResponse::Ok().json(ItemEnvelope { item })
}

async fn list_items(archive: web::Data<ItemArchive>) -> impl Responder {
    HttpResponse::Ok().json(json!({ "items": archive.list() }))
}

async fn get_item(cfg: web::Data<Cfg>, archive: web::Data<ItemArchive>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match archive.get(&id) {
        Some(item) => HttpResponse::Ok().json(ItemEnvelope { item }),
        None => {
            log_line(&cfg.log_dir, &format!("GET /items/{} not found", id));
            HttpResponse::NotFound().json(json!({ "detail": "item not found" }))
        }
    }
}

/// Route table, shared by the live server and tests.
pub fn routes(svc: &mut web::ServiceConfig) {
    svc.route("/items/", web::post().to(create_item))
        .route("/items/", web::get().to(list_items))
        .route("/items/{id}", web::get().to(get_item));
}

/// Item store on an already-bound listener. The caller awaits or spawns the
/// returned server.
pub fn build_server(cfg: Cfg, archive: web::Data<ItemArchive>, listener: TcpListener) -> std::io::Result<Server> {
    if let Ok(addr) = listener.local_addr() {
        log_line(&cfg.log_dir, &format!("Server starting on {}", addr));
        log::info!("item store listening on {}", addr);
    }
    Ok(HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(cfg.clone()))
            .app_data(archive.clone())
            .configure(routes)
    })
    .listen(listener)?
    .run())
}

/// Run the store on the current actix system until it stops.
pub async fn serve(settings: &AppSettings) -> anyhow::Result<()> {
    let listener = TcpListener::bind(settings.api_endpoint())?;
    let cfg = Cfg { log_dir: settings.api_log_dir() };
    build_server(cfg, web::Data::new(ItemArchive::new()), listener)?.await?;
    Ok(())
}

/// Start the store on a background thread with its own runtime.
pub fn start_server(settings: &AppSettings) -> anyhow::Result<()> {
    let bind = settings.api_endpoint();
    let log_dir = settings.api_log_dir();
    stop_server();

    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build() {
                Ok(r) => r,
                Err(e) => {
                    log::error!("failed to create tokio runtime for item store: {}", e);
                    return;
                }
            };

        rt.block_on(async move {
            let server = match TcpListener::bind(&bind)
                .and_then(|l| build_server(Cfg { log_dir }, web::Data::new(ItemArchive::new()), l))
            {
                Ok(s) => s,
                Err(e) => {
                    log::error!("item store bind failed on {}: {}", bind, e);
                    return;
                }
            };
            {
                let mut st = SERVER_STATE.lock().unwrap_or_else(|p| p.into_inner());
                st.handle = Some(server.handle());
            }
            let _ = server.await;
        });
        {
            let mut st = SERVER_STATE.lock().unwrap_or_else(|p| p.into_inner());
            st.runtime = Some(rt);
        }
    });
    Ok(())
}

pub fn stop_server() {
    let (handle, rt) = {
        let mut st = SERVER_STATE.lock().unwrap_or_else(|p| p.into_inner());
        (st.handle.take(), st.runtime.take())
    };
    if let Some(h) = handle {
        let _ = h.stop(false);
    }
    if let Some(r) = rt {
        r.shutdown_timeout(Duration::from_millis(100));
    }
}

pub fn is_running() -> bool {
    SERVER_STATE.lock().unwrap_or_else(|p| p.into_inner()).handle.is_some()
}
