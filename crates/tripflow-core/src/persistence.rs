use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;

/// Storage seam for trip documents. Writes are whole-document; callers hold
/// the per-trip lock, so a store never sees interleaved turns for one trip.
pub trait TripStore {
    fn get(&self, trip_id: &str) -> io::Result<Option<Value>>;
    fn save(&mut self, trip_id: &str, document: &Value) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryTripStore {
    documents: HashMap<String, Value>,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl TripStore for InMemoryTripStore {
    fn get(&self, trip_id: &str) -> io::Result<Option<Value>> {
        Ok(self.documents.get(trip_id).cloned())
    }

    fn save(&mut self, trip_id: &str, document: &Value) -> io::Result<()> {
        self.documents.insert(trip_id.to_string(), document.clone());
        Ok(())
    }
}

/// One pretty-printed JSON file per trip under a root directory.
#[derive(Debug)]
pub struct FileTripStore {
    root: PathBuf,
}

impl FileTripStore {
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn document_path(&self, trip_id: &str) -> PathBuf {
        self.root.join(format!("{trip_id}.json"))
    }
}

impl TripStore for FileTripStore {
    fn get(&self, trip_id: &str) -> io::Result<Option<Value>> {
        let path = self.document_path(trip_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        let document = serde_json::from_slice(&raw)
            .map_err(|err| io::Error::other(format!("corrupt trip document {trip_id}: {err}")))?;
        Ok(Some(document))
    }

    fn save(&mut self, trip_id: &str, document: &Value) -> io::Result<()> {
        let raw = serde_json::to_vec_pretty(document)
            .map_err(|err| io::Error::other(format!("serialize trip {trip_id}: {err}")))?;
        fs::write(self.document_path(trip_id), raw)
    }
}
