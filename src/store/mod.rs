pub mod json;
#[cfg(test)]
pub mod testing;

use crate::station::{
    stats::{QueryError, StatsQuery},
    StationId, StationRecord, TownCoords, TownFilter,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store data is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Station not found: {0}")]
    UnknownStation(StationId),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether repeating the same call may succeed. Malformed data and bad
    /// queries fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Unavailable(_))
    }
}

impl From<QueryError> for StoreError {
    fn from(e: QueryError) -> Self {
        StoreError::InvalidQuery(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Everything the controllers need from the backing store. Calls are
/// blocking.
pub trait DataAccess: Send {
    fn search(&self, town: &TownFilter, name: &str) -> Result<Vec<StationRecord>>;

    /// `points` are `(lat, lon)` pairs.
    fn search_by_polygon(&self, points: &[(f64, f64)]) -> Result<Vec<StationRecord>>;

    fn search_by_stats(&self, query: &StatsQuery) -> Result<Vec<StationRecord>>;

    fn update(&mut self, record: &StationRecord) -> Result<()>;

    /// Removes live stations and appends them to the history store.
    fn delete(&mut self, ids: &[StationId]) -> Result<()>;

    fn set_active(&mut self, ids: &[StationId], state: bool) -> Result<()>;

    fn list_towns(&self) -> Result<Vec<String>>;

    fn coords_by_town(&self) -> Result<Vec<TownCoords>>;
}
