use std::{collections::HashMap, str::FromStr};

use chrono::{Datelike, NaiveDateTime, Timelike};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::station::{StationId, StationRecord};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueryError {
    #[error("Unknown comparator {0:?}")]
    UnknownComparator(String),

    #[error("Hour {0} is outside 0..=23")]
    HourOutOfRange(u32),

    #[error("Weekday {0} is outside 1..=7")]
    WeekdayOutOfRange(u32),

    #[error("Ratio {0} is outside 0..=100")]
    RatioOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "<")]
    Less,
}

impl Comparator {
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Greater => lhs > rhs,
            Comparator::GreaterOrEqual => lhs >= rhs,
            Comparator::Equal => (lhs - rhs).abs() < 1e-6,
            Comparator::LessOrEqual => lhs <= rhs,
            Comparator::Less => lhs < rhs,
        }
    }
}

impl FromStr for Comparator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Comparator::Greater),
            ">=" => Ok(Comparator::GreaterOrEqual),
            "==" => Ok(Comparator::Equal),
            "<=" => Ok(Comparator::LessOrEqual),
            "<" => Ok(Comparator::Less),
            other => Err(QueryError::UnknownComparator(other.to_owned())),
        }
    }
}

/// Usage-ratio filter over the history store.
///
/// Both ranges are inclusive and wrap around when `start > end`, so hours
/// `(22, 2)` cover the night and weekdays `(6, 1)` cover Saturday to Monday.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsQuery {
    pub comparator: Comparator,
    pub ratio_percent: f64,
    pub hours: (u32, u32),
    pub weekdays: (u32, u32),
}

impl StatsQuery {
    pub fn new(
        comparator: Comparator,
        ratio_percent: f64,
        hours: (u32, u32),
        weekdays: (u32, u32),
    ) -> Result<Self, QueryError> {
        if !(0.0..=100.0).contains(&ratio_percent) {
            return Err(QueryError::RatioOutOfRange(ratio_percent));
        }
        for hour in [hours.0, hours.1] {
            if hour > 23 {
                return Err(QueryError::HourOutOfRange(hour));
            }
        }
        for day in [weekdays.0, weekdays.1] {
            if !(1..=7).contains(&day) {
                return Err(QueryError::WeekdayOutOfRange(day));
            }
        }

        Ok(Self {
            comparator,
            ratio_percent,
            hours,
            weekdays,
        })
    }

    pub fn covers(&self, at: NaiveDateTime) -> bool {
        in_cyclic_range(at.hour(), self.hours)
            && in_cyclic_range(at.weekday().number_from_monday(), self.weekdays)
    }
}

fn in_cyclic_range(value: u32, (start, end): (u32, u32)) -> bool {
    if start <= end {
        start <= value && value <= end
    } else {
        value >= start || value <= end
    }
}

/// One past state of a station. Deleted stations land here with `removed`
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub station: StationRecord,
    pub recorded_at: NaiveDateTime,
    #[serde(default)]
    pub removed: bool,
}

/// Share of the total slots holding a bike, in percent.
pub fn fill_ratio(record: &StationRecord) -> Option<f64> {
    if record.slots_total == 0 {
        return None;
    }
    Some(record.bikes_available as f64 / record.slots_total as f64 * 100.0)
}

/// Mean fill ratio per station over the history samples the query covers.
/// Stations without any covered sample are absent from the map.
pub fn mean_fill_ratios<'a>(
    history: impl IntoIterator<Item = &'a HistoryEntry>,
    query: &StatsQuery,
) -> HashMap<StationId, f64> {
    history
        .into_iter()
        .filter(|h| query.covers(h.recorded_at))
        .filter_map(|h| fill_ratio(&h.station).map(|r| (h.station.id.clone(), r)))
        .into_group_map()
        .into_iter()
        .map(|(id, ratios)| {
            let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
            (id, mean)
        })
        .collect()
}
