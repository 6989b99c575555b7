pub mod stats;

use std::{cmp::Ordering, fmt};

use geo_types::Point;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(str: &str) -> Self {
        Self(str.to_owned())
    }

    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A docking station as held by the live store.
///
/// The geometry is kept in query space: `x` is the latitude and `y` the
/// longitude, matching the `[lat, lon]` coordinate order of the stored points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: StationId,
    pub town: String,
    pub name: String,
    pub active: bool,
    pub bikes_available: u32,
    pub slots_available: u32,
    pub slots_total: u32,
    #[serde(
        serialize_with = "geojson::ser::serialize_geometry",
        deserialize_with = "geojson::de::deserialize_geometry"
    )]
    pub geometry: Point,
}

impl StationRecord {
    pub fn latitude(&self) -> f64 {
        self.geometry.x()
    }

    pub fn longitude(&self) -> f64 {
        self.geometry.y()
    }

    pub fn set_position(&mut self, latitude: f64, longitude: f64) {
        self.geometry = Point::new(latitude, longitude);
    }

    /// Label shown in the result list. Not unique: two stations of one town
    /// may share a name.
    pub fn display_key(&self) -> String {
        format!("{} ; {}", self.town, self.name)
    }
}

/// A record as a GeoJSON feature, with the point in the `[lon, lat]` order
/// GeoJSON readers expect.
#[derive(Debug, Serialize)]
pub struct StationFeature<'a> {
    pub id: &'a StationId,
    pub town: &'a str,
    pub name: &'a str,
    pub active: bool,
    pub bikes_available: u32,
    pub slots_available: u32,
    pub slots_total: u32,
    #[serde(serialize_with = "geojson::ser::serialize_geometry")]
    pub geometry: Point,
}

impl<'a> From<&'a StationRecord> for StationFeature<'a> {
    fn from(record: &'a StationRecord) -> Self {
        Self {
            id: &record.id,
            town: &record.town,
            name: &record.name,
            active: record.active,
            bikes_available: record.bikes_available,
            slots_available: record.slots_available,
            slots_total: record.slots_total,
            geometry: Point::new(record.longitude(), record.latitude()),
        }
    }
}

/// A record attribute, used both as a sort key and as an edit-form key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Town,
    Name,
    Active,
    BikesAvailable,
    SlotsAvailable,
    SlotsTotal,
    Latitude,
    Longitude,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Town,
        Field::Name,
        Field::Active,
        Field::BikesAvailable,
        Field::SlotsAvailable,
        Field::SlotsTotal,
        Field::Latitude,
        Field::Longitude,
    ];

    pub fn compare(self, a: &StationRecord, b: &StationRecord) -> Ordering {
        match self {
            Field::Town => a.town.cmp(&b.town),
            Field::Name => a.name.cmp(&b.name),
            Field::Active => a.active.cmp(&b.active),
            Field::BikesAvailable => a.bikes_available.cmp(&b.bikes_available),
            Field::SlotsAvailable => a.slots_available.cmp(&b.slots_available),
            Field::SlotsTotal => a.slots_total.cmp(&b.slots_total),
            Field::Latitude => a.latitude().total_cmp(&b.latitude()),
            Field::Longitude => a.longitude().total_cmp(&b.longitude()),
        }
    }
}

/// Town restriction of a name search. `"all"` and the empty string match
/// every town.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TownFilter {
    All,
    Named(String),
}

impl TownFilter {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() || input.eq_ignore_ascii_case("all") {
            TownFilter::All
        } else {
            TownFilter::Named(input.to_owned())
        }
    }

    pub fn matches(&self, town: &str) -> bool {
        match self {
            TownFilter::All => true,
            TownFilter::Named(name) => name.to_lowercase() == town.to_lowercase(),
        }
    }
}

/// Live positions of every station of one town, as `(lat, lon, active)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TownCoords {
    pub town: String,
    pub coords: Vec<(f64, f64, bool)>,
}

#[cfg(test)]
pub(crate) fn station(id: &str, town: &str, name: &str, active: bool) -> StationRecord {
    StationRecord {
        id: StationId::new(id),
        town: town.to_owned(),
        name: name.to_owned(),
        active,
        bikes_available: 4,
        slots_available: 6,
        slots_total: 10,
        geometry: Point::new(45.76, 4.83),
    }
}
