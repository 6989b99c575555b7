use std::sync::{Arc, Mutex};

use crate::{
    station::{stats::StatsQuery, StationId, StationRecord, TownCoords, TownFilter},
    store::{json::JsonStore, DataAccess, Result, StoreError},
};

/// Mutating calls seen by a [`RecordingStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Update(StationId),
    Delete(Vec<StationId>),
    SetActive(Vec<StationId>, bool),
}

/// In-memory store that logs every mutating call and can be switched to
/// fail. The log is shared so a test keeps a handle after boxing the store.
pub struct RecordingStore {
    inner: JsonStore,
    calls: Arc<Mutex<Vec<Call>>>,
    failing: Arc<Mutex<Option<String>>>,
}

#[derive(Clone)]
pub struct Probe {
    calls: Arc<Mutex<Vec<Call>>>,
    failing: Arc<Mutex<Option<String>>>,
}

impl Probe {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_with(&self, message: &str) {
        *self.failing.lock().unwrap() = Some(message.to_owned());
    }

    pub fn recover(&self) {
        *self.failing.lock().unwrap() = None;
    }
}

impl RecordingStore {
    pub fn new(live: Vec<StationRecord>) -> (Self, Probe) {
        let calls = Arc::new(Mutex::new(vec![]));
        let failing = Arc::new(Mutex::new(None));
        let probe = Probe {
            calls: calls.clone(),
            failing: failing.clone(),
        };
        let store = Self {
            inner: JsonStore::in_memory(live, vec![]),
            calls,
            failing,
        };
        (store, probe)
    }

    fn check(&self) -> Result<()> {
        match self.failing.lock().unwrap().as_ref() {
            Some(message) => Err(StoreError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DataAccess for RecordingStore {
    fn search(&self, town: &TownFilter, name: &str) -> Result<Vec<StationRecord>> {
        self.check()?;
        self.inner.search(town, name)
    }

    fn search_by_polygon(&self, points: &[(f64, f64)]) -> Result<Vec<StationRecord>> {
        self.check()?;
        self.inner.search_by_polygon(points)
    }

    fn search_by_stats(&self, query: &StatsQuery) -> Result<Vec<StationRecord>> {
        self.check()?;
        self.inner.search_by_stats(query)
    }

    fn update(&mut self, record: &StationRecord) -> Result<()> {
        self.check()?;
        self.log(Call::Update(record.id.clone()));
        self.inner.update(record)
    }

    fn delete(&mut self, ids: &[StationId]) -> Result<()> {
        self.check()?;
        self.log(Call::Delete(ids.to_vec()));
        self.inner.delete(ids)
    }

    fn set_active(&mut self, ids: &[StationId], state: bool) -> Result<()> {
        self.check()?;
        self.log(Call::SetActive(ids.to_vec(), state));
        self.inner.set_active(ids, state)
    }

    fn list_towns(&self) -> Result<Vec<String>> {
        self.check()?;
        self.inner.list_towns()
    }

    fn coords_by_town(&self) -> Result<Vec<TownCoords>> {
        self.check()?;
        self.inner.coords_by_town()
    }
}
