use std::str::FromStr;

use serde::Serialize;

use crate::station::{Field, StationRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Flag,
    Number,
}

impl FieldType {
    pub fn of(field: Field) -> Self {
        match field {
            Field::Town | Field::Name => FieldType::Text,
            Field::Active => FieldType::Flag,
            Field::BikesAvailable | Field::SlotsAvailable | Field::SlotsTotal => FieldType::Integer,
            Field::Latitude | Field::Longitude => FieldType::Number,
        }
    }
}

/// Label shown next to an input; the field key stays the record attribute.
pub fn label(field: Field) -> &'static str {
    match field {
        Field::Town => "town",
        Field::Name => "name",
        Field::Active => "active",
        Field::BikesAvailable => "available bikes",
        Field::SlotsAvailable => "available parking spots",
        Field::SlotsTotal => "total parking spots",
        Field::Latitude => "latitude",
        Field::Longitude => "longitude",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub field: Field,
    pub label: &'static str,
    pub kind: FieldType,
    pub value: String,
}

pub type FieldSet = Vec<FormField>;

pub fn try_coerce<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}

fn keep_or<T: FromStr>(slot: &mut T, value: &str) {
    if let Some(v) = try_coerce(value) {
        *slot = v;
    }
}

/// One input per record attribute, identifier excluded, with the geometry
/// split into latitude and longitude.
pub fn populate(record: &StationRecord) -> FieldSet {
    Field::ALL
        .into_iter()
        .map(|field| {
            let value = match field {
                Field::Town => record.town.clone(),
                Field::Name => record.name.clone(),
                Field::Active => record.active.to_string(),
                Field::BikesAvailable => record.bikes_available.to_string(),
                Field::SlotsAvailable => record.slots_available.to_string(),
                Field::SlotsTotal => record.slots_total.to_string(),
                Field::Latitude => record.latitude().to_string(),
                Field::Longitude => record.longitude().to_string(),
            };
            FormField {
                field,
                label: label(field),
                kind: FieldType::of(field),
                value,
            }
        })
        .collect()
}

/// Applies the inputs over `record`. An input that does not coerce to its
/// field's type keeps the old value. Latitude and longitude coerce to finite
/// decimals, not integers, and change only when both parse.
pub fn submit(record: &StationRecord, fields: &[FormField]) -> StationRecord {
    let mut merged = record.clone();
    let mut latitude = None;
    let mut longitude = None;

    for f in fields {
        match f.field {
            Field::Town => merged.town = f.value.clone(),
            Field::Name => merged.name = f.value.clone(),
            Field::Active => keep_or(&mut merged.active, &f.value),
            Field::BikesAvailable => keep_or(&mut merged.bikes_available, &f.value),
            Field::SlotsAvailable => keep_or(&mut merged.slots_available, &f.value),
            Field::SlotsTotal => keep_or(&mut merged.slots_total, &f.value),
            Field::Latitude => latitude = try_coerce::<f64>(&f.value).filter(|v| v.is_finite()),
            Field::Longitude => longitude = try_coerce::<f64>(&f.value).filter(|v| v.is_finite()),
        }
    }

    if let (Some(lat), Some(lon)) = (latitude, longitude) {
        merged.set_position(lat, lon);
    }
    merged
}

#[derive(Debug)]
struct OpenForm {
    index: usize,
    record: StationRecord,
    fields: FieldSet,
}

/// The edit panel: closed, or open on one result-list entry.
#[derive(Debug, Default)]
pub struct EditForm {
    open: Option<OpenForm>,
}

impl EditForm {
    pub fn open(&mut self, index: usize, record: &StationRecord) {
        self.open = Some(OpenForm {
            index,
            record: record.clone(),
            fields: populate(record),
        });
    }

    pub fn close(&mut self) {
        self.open = None;
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn fields(&self) -> Option<&[FormField]> {
        self.open.as_ref().map(|o| o.fields.as_slice())
    }

    /// Types into one input. Returns `false` when the panel is closed.
    pub fn set_value(&mut self, field: Field, value: &str) -> bool {
        let Some(open) = self.open.as_mut() else {
            return false;
        };
        if let Some(f) = open.fields.iter_mut().find(|f| f.field == field) {
            f.value = value.to_owned();
        }
        true
    }

    /// Result-list index and merged record for the current inputs.
    pub fn submission(&self) -> Option<(usize, StationRecord)> {
        self.open
            .as_ref()
            .map(|o| (o.index, submit(&o.record, &o.fields)))
    }
}
