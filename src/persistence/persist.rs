use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

use super::settings::AppSettings;
use crate::graph_utils::graph::GraphState;
use crate::graph_utils::ids::IdAllocator;
use crate::graph_utils::view::{Point, ViewTransform};
use crate::prompt::history::MessageHistory;

/// Snapshot of a session. Submissions still in flight are not resumed; their
/// user entries come back without a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub graph: GraphState,
    pub history: MessageHistory,
    pub next_id: u64,
    pub pan: (f32, f32),
    pub zoom: f32,
}

impl SessionFile {
    pub fn from_runtime(graph: &GraphState, history: &MessageHistory, ids: &IdAllocator, view: &ViewTransform) -> Self {
        Self {
            graph: graph.clone(),
            history: history.clone(),
            next_id: ids.peek(),
            pan: (view.pan.x, view.pan.y),
            zoom: view.zoom,
        }
    }

    /// Split back into runtime pieces. The view center is recomputed by the
    /// canvas on its next frame.
    pub fn into_runtime(self) -> (GraphState, MessageHistory, IdAllocator, ViewTransform) {
        let view = ViewTransform::new(Point::default(), Point::new(self.pan.0, self.pan.1), self.zoom);
        (self.graph, self.history, IdAllocator::resume_from(self.next_id), view)
    }
}

static SETTINGS_OVERRIDE: OnceLock<AppSettings> = OnceLock::new();

pub fn set_settings_override(settings: AppSettings) {
    let _ = SETTINGS_OVERRIDE.set(settings);
}

fn autosave_dir() -> PathBuf {
    // If an override is set (e.g. from main.rs), use it.
    if let Some(settings) = SETTINGS_OVERRIDE.get() {
        return settings.autosave_dir();
    }
    AppSettings::load().unwrap_or_default().autosave_dir()
}

pub fn active_state_path() -> PathBuf {
    autosave_dir().join("session.ron")
}

pub fn versioned_state_path_now() -> PathBuf {
    let now = OffsetDateTime::now_utc();
    let fmt = format_description!("[year][month][day]_[hour][minute][second]");
    let stamp = now.format(fmt).unwrap_or_else(|_| "unknown".to_string());
    autosave_dir().join(format!("session_{}.ron", stamp))
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("ron.tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(data)?;
        f.flush()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

fn to_ron(state: &SessionFile) -> anyhow::Result<String> {
    let pretty = PrettyConfig::new()
        .separate_tuple_members(true)
        .enumerate_arrays(true);
    Ok(ron::ser::to_string_pretty(state, pretty)?)
}

pub fn save_to_path(state: &SessionFile, path: &Path) -> anyhow::Result<()> {
    let s = to_ron(state)?;
    atomic_write(path, s.as_bytes())?;
    Ok(())
}

pub fn save_active(state: &SessionFile) -> anyhow::Result<PathBuf> {
    let path = active_state_path();
    save_to_path(state, &path)?;
    Ok(path)
}

pub fn save_versioned(state: &SessionFile) -> anyhow::Result<PathBuf> {
    let path = versioned_state_path_now();
    save_to_path(state, &path)?;
    Ok(path)
}

pub fn load_active() -> anyhow::Result<Option<SessionFile>> {
    let path = active_state_path();
    if !path.exists() {
        return Ok(None);
    }
    load_from_path(&path).map(Some)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<SessionFile> {
    let mut f = File::open(path)?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let state: SessionFile = ron::from_str(&buf)?;
    Ok(state)
}

pub fn list_versions() -> anyhow::Result<Vec<PathBuf>> {
    let dir = autosave_dir();
    let mut entries: Vec<PathBuf> = Vec::new();
    if dir.exists() {
        for e in fs::read_dir(dir)? {
            let p = e?.path();
            if let Some(name) = p.file_name().and_then(|s| s.to_str())
                && name.starts_with("session_") && name.ends_with(".ron")
            {
                entries.push(p);
            }
        }
    }
    // newest first; names sort by timestamp
    entries.sort();
    entries.reverse();
    Ok(entries)
}
