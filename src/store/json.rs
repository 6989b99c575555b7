use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, BufWriter, ErrorKind},
    path::{Path, PathBuf},
};

use chrono::Local;
use geo::{Contains, LineString, Point, Polygon};
use itertools::Itertools;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::{
    station::{
        stats::{mean_fill_ratios, HistoryEntry, StatsQuery},
        StationId, StationRecord, TownCoords, TownFilter,
    },
    store::{DataAccess, Result, StoreError},
};

const LIVE_FILE: &str = "live.json";
const HISTORY_FILE: &str = "history.json";

/// Live and history collections held in memory and mirrored to two JSON
/// files. Every mutation rewrites the file it touched.
pub struct JsonStore {
    dir: Option<PathBuf>,
    live: Vec<StationRecord>,
    history: Vec<HistoryEntry>,
}

fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let f = File::open(path)?;
    let rdr = BufReader::new(f);
    Ok(serde_json::from_reader(rdr)?)
}

fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let f = File::create(path)?;
    let wtr = BufWriter::new(f);
    serde_json::to_writer_pretty(wtr, value)?;
    Ok(())
}

impl JsonStore {
    /// Opens `dir/live.json` and, when present, `dir/history.json`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let live: Vec<StationRecord> = read_json(dir.join(LIVE_FILE))?;
        let history: Vec<HistoryEntry> = match read_json(dir.join(HISTORY_FILE)) {
            Ok(h) => h,
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => vec![],
            Err(e) => return Err(e),
        };

        info!(
            "opened store at {} with {} stations and {} history entries",
            dir.display(),
            live.len(),
            history.len()
        );

        Ok(Self {
            dir: Some(dir),
            live,
            history,
        })
    }

    pub fn in_memory(live: Vec<StationRecord>, history: Vec<HistoryEntry>) -> Self {
        Self {
            dir: None,
            live,
            history,
        }
    }

    #[cfg(test)]
    pub fn live(&self) -> &[StationRecord] {
        &self.live
    }

    #[cfg(test)]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    fn persist_live(&self) -> Result<()> {
        match &self.dir {
            Some(dir) => write_json(dir.join(LIVE_FILE), &self.live),
            None => Ok(()),
        }
    }

    fn persist_history(&self) -> Result<()> {
        match &self.dir {
            Some(dir) => write_json(dir.join(HISTORY_FILE), &self.history),
            None => Ok(()),
        }
    }

    fn sorted(records: impl Iterator<Item = StationRecord>) -> Vec<StationRecord> {
        records
            .sorted_by(|a, b| a.town.cmp(&b.town).then_with(|| a.name.cmp(&b.name)))
            .collect()
    }
}

impl DataAccess for JsonStore {
    fn search(&self, town: &TownFilter, name: &str) -> Result<Vec<StationRecord>> {
        let needle = name.trim().to_lowercase();
        let found = Self::sorted(
            self.live
                .iter()
                .filter(|s| town.matches(&s.town))
                .filter(|s| s.name.to_lowercase().contains(&needle))
                .cloned(),
        );

        debug!("search {:?} {:?} matched {}", town, name, found.len());
        Ok(found)
    }

    fn search_by_polygon(&self, points: &[(f64, f64)]) -> Result<Vec<StationRecord>> {
        if points.len() < 3 {
            return Err(StoreError::InvalidQuery(format!(
                "A polygon needs at least 3 points, got {}",
                points.len()
            )));
        }

        let polygon = Polygon::new(LineString::from(points.to_vec()), vec![]);
        let found = Self::sorted(
            self.live
                .iter()
                .filter(|s| polygon.contains(&Point::new(s.latitude(), s.longitude())))
                .cloned(),
        );

        debug!("polygon search matched {}", found.len());
        Ok(found)
    }

    fn search_by_stats(&self, query: &StatsQuery) -> Result<Vec<StationRecord>> {
        let ratios = mean_fill_ratios(&self.history, query);
        let found = Self::sorted(
            self.live
                .iter()
                .filter(|s| {
                    ratios
                        .get(&s.id)
                        .is_some_and(|r| query.comparator.holds(*r, query.ratio_percent))
                })
                .cloned(),
        );

        debug!("stats search {:?} matched {}", query, found.len());
        Ok(found)
    }

    fn update(&mut self, record: &StationRecord) -> Result<()> {
        let current = self
            .live
            .iter_mut()
            .find(|s| s.id == record.id)
            .ok_or_else(|| StoreError::UnknownStation(record.id.clone()))?;

        let previous = std::mem::replace(current, record.clone());
        self.history.push(HistoryEntry {
            station: previous,
            recorded_at: Local::now().naive_local(),
            removed: false,
        });

        self.persist_live()?;
        self.persist_history()?;
        info!("updated station {}", record.id);
        Ok(())
    }

    fn delete(&mut self, ids: &[StationId]) -> Result<()> {
        let ids: HashSet<&StationId> = ids.iter().collect();
        let now = Local::now().naive_local();

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.live)
            .into_iter()
            .partition(|s| ids.contains(&s.id));
        self.live = kept;

        let count = removed.len();
        self.history.extend(removed.into_iter().map(|station| HistoryEntry {
            station,
            recorded_at: now,
            removed: true,
        }));

        self.persist_live()?;
        self.persist_history()?;
        info!("deleted {} stations", count);
        Ok(())
    }

    fn set_active(&mut self, ids: &[StationId], state: bool) -> Result<()> {
        let ids: HashSet<&StationId> = ids.iter().collect();
        let mut count = 0;
        for s in self.live.iter_mut().filter(|s| ids.contains(&s.id)) {
            s.active = state;
            count += 1;
        }

        self.persist_live()?;
        info!("set active={} on {} stations", state, count);
        Ok(())
    }

    fn list_towns(&self) -> Result<Vec<String>> {
        Ok(self
            .live
            .iter()
            .map(|s| s.town.clone())
            .unique()
            .sorted()
            .collect())
    }

    fn coords_by_town(&self) -> Result<Vec<TownCoords>> {
        Ok(self
            .live
            .iter()
            .into_group_map_by(|s| s.town.clone())
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|(town, stations)| TownCoords {
                town,
                coords: stations
                    .into_iter()
                    .map(|s| (s.latitude(), s.longitude(), s.active))
                    .collect(),
            })
            .collect())
    }
}
