use std::sync::Mutex;

use crate::prompt::store::ItemRecord;

/// In-memory archive behind the `/items/` routes, kept in insertion order.
/// Posting an id that already exists replaces that record in place.
#[derive(Default)]
pub struct ItemArchive {
    items: Mutex<Vec<ItemRecord>>,
}

impl ItemArchive {
    pub fn new() -> Self { Self::default() }

    pub fn upsert(&self, record: ItemRecord) -> ItemRecord {
        let mut items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        match items.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => items.push(record.clone()),
        }
        record
    }

    pub fn get(&self, id: &str) -> Option<ItemRecord> {
        let items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        items.iter().find(|r| r.id == id).cloned()
    }

    pub fn list(&self) -> Vec<ItemRecord> {
        self.items.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

// Server lifecycle API (feature-gated). Non-API builds get no-op stubs.
#[cfg(feature = "api")]
pub mod server;

#[cfg(not(feature = "api"))]
pub mod server {
    use crate::persistence::settings::AppSettings;

    pub fn start_server(_cfg: &AppSettings) -> anyhow::Result<()> { Ok(()) }
    pub fn stop_server() {}
    pub fn is_running() -> bool { false }
}
