#![allow(clippy::collapsible_if)]
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui::{self, Align2, Color32, FontId, Pos2, Rect, Sense, Stroke, Vec2};
use tokio::runtime::Runtime;

use crate::graph_utils::edge_drop::{self, ConnectionState};
use crate::graph_utils::graph::{ConnectParams, GraphState, NodeChange, NodeKind, NODE_SIZE};
use crate::graph_utils::ids::{IdAllocator, NodeId};
use crate::graph_utils::view::{Point, PointerEvent, ViewTransform};
use crate::persistence::persist::{self, SessionFile};
use crate::persistence::settings::AppSettings;
use crate::prompt::generation::GeminiClient;
use crate::prompt::history::{MessageHistory, Role};
use crate::prompt::pipeline::{FailurePolicy, PromptPipeline, PromptSession};
use crate::prompt::store::HttpItemStore;

const HANDLE_RADIUS: f32 = 5.0;

pub struct GraphApp {
    graph: GraphState,
    ids: IdAllocator,
    view: ViewTransform,
    session: PromptSession,
    app_settings: AppSettings,
    // Owns the worker threads the pipeline spawns onto
    _runtime: Runtime,
    // Node whose source handle is being dragged
    connecting_from: Option<NodeId>,
    last_canvas_rect: Option<Rect>,
    fitted: bool,
    notice: Option<(String, Instant)>,
}

impl GraphApp {
    pub fn new(app_settings: AppSettings, runtime: Runtime, restored: Option<SessionFile>) -> Self {
        let (graph, history, ids, view, fitted) = match restored {
            Some(state) => {
                let (g, h, i, v) = state.into_runtime();
                (g, h, i, v, true)
            }
            None => (GraphState::initial(), MessageHistory::new(), IdAllocator::new(), ViewTransform::default(), false),
        };
        let pipeline = PromptPipeline::new(
            Arc::new(GeminiClient::from_settings(&app_settings)),
            Arc::new(HttpItemStore::from_settings(&app_settings)),
            app_settings.failure_policy,
            runtime.handle().clone(),
        );
        Self {
            graph,
            ids,
            view,
            session: PromptSession::with_history(history, pipeline),
            app_settings,
            _runtime: runtime,
            connecting_from: None,
            last_canvas_rect: None,
            fitted,
            notice: None,
        }
    }

    fn snapshot(&self) -> SessionFile {
        SessionFile::from_runtime(&self.graph, &self.session.history, &self.ids, &self.view)
    }

    fn notify(&mut self, text: impl Into<String>) {
        self.notice = Some((text.into(), Instant::now() + Duration::from_secs(3)));
    }

    fn save_now(&mut self) {
        match persist::save_active(&self.snapshot()) {
            Ok(path) => self.notify(format!("Saved to {}", path.display())),
            Err(e) => {
                log::error!("save failed: {}", e);
                self.notify(format!("Save failed: {}", e));
            }
        }
    }

    fn save_versioned_now(&mut self) {
        match persist::save_versioned(&self.snapshot()) {
            Ok(path) => self.notify(format!("Saved version {}", path.display())),
            Err(e) => {
                log::error!("versioned save failed: {}", e);
                self.notify(format!("Save failed: {}", e));
            }
        }
    }

    fn load_latest(&mut self) {
        match persist::load_active() {
            Ok(Some(state)) => {
                self.apply_loaded(state);
                self.notify("Loaded last session");
            }
            Ok(None) => self.notify("No saved session"),
            Err(e) => {
                log::error!("load failed: {}", e);
                self.notify(format!("Load failed: {}", e));
            }
        }
    }

    fn load_version(&mut self, path: &Path) {
        match persist::load_from_path(path) {
            Ok(state) => {
                self.apply_loaded(state);
                self.notify(format!("Loaded {}", path.display()));
            }
            Err(e) => {
                log::error!("load of {} failed: {}", path.display(), e);
                self.notify(format!("Load failed: {}", e));
            }
        }
    }

    fn apply_loaded(&mut self, state: SessionFile) {
        let (g, h, i, v) = state.into_runtime();
        self.graph = g;
        // Never rewind: prompts still in flight hold ids from the live counter.
        self.ids.catch_up(&i);
        self.view = v;
        self.session.replace_history(h);
        self.connecting_from = None;
        self.last_canvas_rect = None;
    }

    fn set_failure_policy(&mut self, policy: FailurePolicy) {
        self.session.set_policy(policy);
        self.app_settings.failure_policy = policy;
        if let Err(e) = self.app_settings.save() {
            log::error!("saving settings failed: {}", e);
            self.notify(format!("Settings not saved: {}", e));
        }
    }

    fn new_diagram(&mut self) {
        // The id counter keeps running so correlation ids in the transcript stay unique.
        self.graph = GraphState::initial();
        self.connecting_from = None;
        self.fitted = false;
    }

    fn top_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            // Check for keyboard shortcuts
            if ctx.input_mut(|i| i.consume_shortcut(&egui::KeyboardShortcut::new(egui::Modifiers::COMMAND, egui::Key::S))) {
                self.save_now();
            }
            if ctx.input_mut(|i| i.consume_shortcut(&egui::KeyboardShortcut::new(egui::Modifiers::COMMAND | egui::Modifiers::SHIFT, egui::Key::S))) {
                self.save_versioned_now();
            }
            if ctx.input_mut(|i| i.consume_shortcut(&egui::KeyboardShortcut::new(egui::Modifiers::COMMAND, egui::Key::O))) {
                self.load_latest();
            }

            ui.horizontal(|ui| {
                ui.strong("iaGram");
                ui.separator();
                ui.menu_button("File", |ui| {
                    if ui.add(egui::Button::new("Save").shortcut_text(ctx.format_shortcut(&egui::KeyboardShortcut::new(egui::Modifiers::COMMAND, egui::Key::S)))).clicked() {
                        self.save_now();
                        ui.close();
                    }
                    if ui.add(egui::Button::new("Save Version").shortcut_text(ctx.format_shortcut(&egui::KeyboardShortcut::new(egui::Modifiers::COMMAND | egui::Modifiers::SHIFT, egui::Key::S)))).clicked() {
                        self.save_versioned_now();
                        ui.close();
                    }
                    if ui.add(egui::Button::new("Load Latest").shortcut_text(ctx.format_shortcut(&egui::KeyboardShortcut::new(egui::Modifiers::COMMAND, egui::Key::O)))).clicked() {
                        self.load_latest();
                        ui.close();
                    }
                    ui.menu_button("Load Version", |ui| {
                        match persist::list_versions() {
                            Ok(versions) if versions.is_empty() => { ui.label("No saved versions"); }
                            Ok(versions) => {
                                for path in versions {
                                    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                                    if ui.button(name).clicked() {
                                        self.load_version(&path);
                                        ui.close();
                                    }
                                }
                            }
                            Err(e) => { ui.label(format!("Cannot list versions: {}", e)); }
                        }
                    });
                    if ui.button("New Diagram").clicked() {
                        self.new_diagram();
                        ui.close();
                    }
                });
                ui.menu_button("Settings", |ui| {
                    let mut mark_failed = self.session.policy() == FailurePolicy::MarkFailed;
                    if ui.checkbox(&mut mark_failed, "Mark failed prompts").changed() {
                        self.set_failure_policy(if mark_failed { FailurePolicy::MarkFailed } else { FailurePolicy::Silent });
                    }
                    ui.separator();
                    let store = if crate::api::server::is_running() { "running" } else { "stopped" };
                    ui.label(format!("Item store: {}", store));
                    ui.small(format!("Settings: {}", AppSettings::settings_dir().display()));
                });
                ui.menu_button("View", |ui| {
                    if ui.button("Fit View").clicked() {
                        self.fitted = false;
                        ui.close();
                    }
                });
                ui.separator();
                ui.label(format!("nodes: {}  edges: {}", self.graph.node_count(), self.graph.edge_count()));
                let pending = self.session.in_flight();
                if pending > 0 {
                    ui.separator();
                    ui.spinner();
                    ui.label(format!("{} prompt(s) pending", pending));
                }
                if let Some((text, until)) = &self.notice {
                    if Instant::now() < *until {
                        ui.separator();
                        ui.small(text);
                    }
                }
            });
        });
    }

    fn prompt_panel(&mut self, ctx: &egui::Context) {
        egui::Area::new(egui::Id::new("prompt_panel"))
            .anchor(Align2::LEFT_TOP, [12.0, 40.0])
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.set_width(320.0);
                    egui::ScrollArea::vertical()
                        .max_height(180.0)
                        .stick_to_bottom(true)
                        .auto_shrink([false, true])
                        .show(ui, |ui| {
                            for line in self.session.history.render() {
                                let text = match line.role {
                                    Role::User => egui::RichText::new(line.text).strong(),
                                    Role::Response => egui::RichText::new(line.text).color(Color32::from_rgb(90, 90, 90)),
                                };
                                let text = if line.failed { text.strikethrough().color(Color32::from_rgb(200, 80, 80)) } else { text };
                                match line.role {
                                    Role::User => ui.with_layout(egui::Layout::top_down(egui::Align::Max), |ui| ui.label(text)),
                                    Role::Response => ui.with_layout(egui::Layout::top_down(egui::Align::Min), |ui| ui.label(text)),
                                };
                            }
                        });
                    ui.separator();
                    let mut submit = false;
                    ui.horizontal(|ui| {
                        let edit = egui::TextEdit::singleline(&mut self.session.input)
                            .hint_text("Send your prompt...")
                            .desired_width(250.0);
                        let resp = ui.add(edit);
                        if resp.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                            submit = true;
                            resp.request_focus();
                        }
                        if ui.button("Send").clicked() {
                            submit = true;
                        }
                    });
                    if submit {
                        let id = self.session.submit(&mut self.ids);
                        log::debug!("prompt {} submitted", id);
                    }
                });
            });
    }

    fn canvas(&mut self, ui: &mut egui::Ui) {
        // Detect canvas size/position changes and adjust pan to keep view stable
        let available = ui.available_rect_before_wrap();
        if let Some(prev) = self.last_canvas_rect {
            if prev != available {
                let dc = available.center() - prev.center();
                self.view.pan_by(dc.x * (self.view.zoom - 1.0), dc.y * (self.view.zoom - 1.0));
            }
        }
        self.last_canvas_rect = Some(available);
        self.view.center = available.center().into();
        if !self.fitted {
            if let Some(c) = self.graph.bounds_center() {
                self.view.center_on(c);
            }
            self.fitted = true;
        }

        let bg_resp = ui.allocate_rect(available, Sense::click_and_drag());
        let painter = ui.painter_at(available);
        let view = self.view;
        let to_screen = move |p: Point| -> Pos2 { view.to_screen_position(p).into() };
        let zoom = view.zoom;

        // Dotted background
        let gap = 12.0 * zoom;
        if gap >= 4.0 {
            let origin = to_screen(Point::default());
            let start_x = available.left() + (origin.x - available.left()).rem_euclid(gap);
            let start_y = available.top() + (origin.y - available.top()).rem_euclid(gap);
            let mut x = start_x;
            while x < available.right() {
                let mut y = start_y;
                while y < available.bottom() {
                    painter.circle_filled(Pos2::new(x, y), 1.0, Color32::from_gray(200));
                    y += gap;
                }
                x += gap;
            }
        }

        // Edges first, under nodes
        for edge in self.graph.edges() {
            let (Some(src), Some(dst)) = (self.graph.node(&edge.source), self.graph.node(&edge.target)) else { continue };
            let a = to_screen(src.source_anchor());
            let b = to_screen(dst.target_anchor());
            let color = if edge.selected { Color32::from_rgb(255, 0, 114) } else { Color32::from_gray(150) };
            painter.line_segment([a, b], Stroke::new(1.5, color));
        }

        let mut changes: Vec<NodeChange> = Vec::new();
        let mut any_node_dragged = false;
        let mut connect_end: Option<NodeId> = None;
        let size = Vec2::new(NODE_SIZE.0, NODE_SIZE.1) * zoom;
        let handle_r = (HANDLE_RADIUS * zoom).clamp(3.0, 8.0);

        for node in self.graph.nodes() {
            let rect = Rect::from_min_size(to_screen(node.top_left()), size);
            let resp = ui.interact(rect, egui::Id::new(("node", node.id.as_str())), Sense::click_and_drag());
            if resp.dragged() {
                any_node_dragged = true;
                let d = resp.drag_delta() / zoom;
                if d != Vec2::ZERO {
                    changes.push(NodeChange::Position {
                        id: node.id.clone(),
                        position: Point::new(node.position.x + d.x, node.position.y + d.y),
                    });
                }
            }
            if resp.clicked() {
                changes.push(NodeChange::Select { id: node.id.clone(), selected: !node.selected });
            }

            let fill = Color32::WHITE;
            let stroke = if node.selected { Stroke::new(2.0, Color32::from_rgb(26, 25, 43)) } else { Stroke::new(1.0, Color32::from_gray(30)) };
            painter.rect_filled(rect, 3.0 * zoom, fill);
            painter.rect_stroke(rect, 3.0 * zoom, stroke, egui::StrokeKind::Inside);
            painter.text(
                rect.center(),
                Align2::CENTER_CENTER,
                &node.label,
                FontId::proportional((12.0 * zoom).clamp(8.0, 20.0)),
                Color32::from_gray(20),
            );

            if node.kind != NodeKind::Input {
                painter.circle_filled(to_screen(node.target_anchor()), handle_r, Color32::from_gray(30));
            }
            let handle = to_screen(node.source_anchor());
            painter.circle_filled(handle, handle_r, Color32::from_gray(30));
            let handle_rect = Rect::from_center_size(handle, Vec2::splat(handle_r * 3.0));
            let hresp = ui.interact(handle_rect, egui::Id::new(("handle", node.id.as_str())), Sense::drag());
            if hresp.drag_started() {
                self.connecting_from = Some(node.id.clone());
            }
            if hresp.drag_stopped() {
                connect_end = Some(node.id.clone());
            }
        }

        // Rubber band for an in-progress connection
        if let Some(from) = &self.connecting_from {
            if let (Some(src), Some(p)) = (self.graph.node(from), ui.input(|i| i.pointer.latest_pos())) {
                painter.line_segment([to_screen(src.source_anchor()), p], Stroke::new(1.0, Color32::from_gray(110)));
            }
        }

        self.graph.apply_node_changes(changes);

        if let Some(from) = connect_end {
            self.connecting_from = None;
            if let Some(event) = terminal_event(ui) {
                self.finish_connection(from, &event);
            }
        }

        if !any_node_dragged && self.connecting_from.is_none() {
            let delta = bg_resp.drag_delta();
            if delta != Vec2::ZERO {
                self.view.pan_by(delta.x, delta.y);
            }
        }

        // Zoom with scroll only when pointer is over the canvas area
        if bg_resp.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                let factor = (1.0 + scroll * 0.001).clamp(0.9, 1.1);
                self.view.zoom_by(factor);
            }
        }
    }

    /// A drop on another node is an ordinary connect; anything else goes to
    /// edge-drop node creation.
    fn finish_connection(&mut self, from: NodeId, event: &PointerEvent) {
        let drop_at = self.view.event_to_canvas(event);
        let target = self
            .graph
            .node_at(drop_at)
            .filter(|n| n.id != from)
            .map(|n| n.id.clone());
        let connection = ConnectionState { is_valid: target.is_some(), from_node: from.clone() };
        if let Some(target) = target {
            if self.graph.connect(ConnectParams { source: from, target }, &mut self.ids).is_none() {
                log::debug!("connection ignored: already linked");
            }
        }
        edge_drop::on_connect_end(&mut self.graph, &mut self.ids, &self.view, event, &connection);
    }
}

/// Build the terminal event of a drag from this frame's input. Touch
/// releases report their points; mice report the pointer position.
fn terminal_event(ui: &egui::Ui) -> Option<PointerEvent> {
    ui.input(|i| {
        let touches: Vec<Point> = i
            .events
            .iter()
            .filter_map(|e| match e {
                egui::Event::Touch { pos, phase: egui::TouchPhase::End, .. } => Some(Point::from(*pos)),
                _ => None,
            })
            .collect();
        if !touches.is_empty() {
            return Some(PointerEvent::touch(touches));
        }
        i.pointer
            .interact_pos()
            .or_else(|| i.pointer.latest_pos())
            .map(|p| PointerEvent::mouse(p.into()))
    })
}

impl eframe::App for GraphApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Fold in whatever the pipeline finished since last frame
        self.session.poll();
        if self.session.in_flight() > 0 {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
        if let Some((_, until)) = &self.notice {
            if Instant::now() >= *until {
                self.notice = None;
            }
        }

        self.top_bar(ctx);
        egui::CentralPanel::default()
            .frame(egui::Frame::new().fill(Color32::from_gray(245)))
            .show(ctx, |ui| self.canvas(ui));
        self.prompt_panel(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if let Err(e) = persist::save_active(&self.snapshot()) {
            log::error!("autosave on exit failed: {}", e);
        }
        if self.app_settings.api_enabled {
            crate::api::server::stop_server();
        }
    }
}
