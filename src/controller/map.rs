use std::collections::BTreeMap;

use image::DynamicImage;
use serde::Serialize;
use tracing::debug;

use crate::{
    config::TownConfig,
    controller::results::Query,
    render::{station_points, BoundingBox, MapRenderer, Raster, LIVE_PADDING},
    store::{self, DataAccess},
};

#[derive(Debug, thiserror::Error)]
pub enum PolygonError {
    #[error("Polygon is not a JSON list of [x, y] points: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("A polygon needs at least 3 points, got {0}")]
    TooFewPoints(usize),

    #[error("Polygon coordinates must be finite numbers")]
    NotFinite,

    #[error("Unknown town {0:?}")]
    UnknownTown(String),
}

/// A user-drawn selection, in map space `(lon, lat)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionPolygon {
    pub town: String,
    pub points: Vec<(f64, f64)>,
}

impl SelectionPolygon {
    pub fn parse(town: &str, text: &str) -> Result<Self, PolygonError> {
        let points: Vec<[f64; 2]> = serde_json::from_str(text)?;
        if points.len() < 3 {
            return Err(PolygonError::TooFewPoints(points.len()));
        }
        if points.iter().flatten().any(|v| !v.is_finite()) {
            return Err(PolygonError::NotFinite);
        }

        Ok(Self {
            town: town.to_owned(),
            points: points.into_iter().map(|[x, y]| (x, y)).collect(),
        })
    }

    /// Vertices in the `(lat, lon)` order the store queries with.
    pub fn query_points(&self) -> Vec<(f64, f64)> {
        self.points.iter().map(|&(lon, lat)| (lat, lon)).collect()
    }
}

/// Renders of one town. `displayed` is what the map view shows: the overlay,
/// with the selection polygon on top when one is drawn.
#[derive(Debug, Clone)]
pub struct MapSurface {
    pub extent: BoundingBox,
    pub live_bounds: Option<BoundingBox>,
    base: Raster,
    overlay: Raster,
    displayed: Raster,
}

impl MapSurface {
    #[cfg(test)]
    pub fn base(&self) -> &Raster {
        &self.base
    }

    #[cfg(test)]
    pub fn overlay(&self) -> &Raster {
        &self.overlay
    }

    pub fn displayed(&self) -> &Raster {
        &self.displayed
    }
}

#[derive(Debug)]
pub struct MapSelection {
    surfaces: BTreeMap<String, MapSurface>,
    current: Option<String>,
    polygon: Option<SelectionPolygon>,
}

impl MapSelection {
    /// Renders every town's base once. Overlays start as the bare base until
    /// the first refresh.
    pub fn new(renderer: &dyn MapRenderer, towns: Vec<(TownConfig, DynamicImage)>) -> Self {
        let surfaces = towns
            .into_iter()
            .map(|(config, image)| {
                let base = Self::render_base(renderer, &config, &image);
                let surface = MapSurface {
                    extent: config.extent,
                    live_bounds: None,
                    overlay: base.clone(),
                    displayed: base.clone(),
                    base,
                };
                (config.name, surface)
            })
            .collect();

        Self {
            surfaces,
            current: None,
            polygon: None,
        }
    }

    pub fn render_base(renderer: &dyn MapRenderer, config: &TownConfig, image: &DynamicImage) -> Raster {
        debug!("rendering base map of {}", config.name);
        renderer.render_base(image, &config.extent)
    }

    pub fn towns(&self) -> impl Iterator<Item = &str> {
        self.surfaces.keys().map(String::as_str)
    }

    pub fn surface(&self, town: &str) -> Option<&MapSurface> {
        self.surfaces.get(town)
    }

    pub fn current_town(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn polygon(&self) -> Option<&SelectionPolygon> {
        self.polygon.as_ref()
    }

    pub fn polygon_search_enabled(&self) -> bool {
        self.polygon.is_some()
    }

    /// Redraws the station markers of every town from live data.
    pub fn refresh_all(
        &mut self,
        store: &dyn DataAccess,
        renderer: &dyn MapRenderer,
    ) -> store::Result<()> {
        self.refresh_where(store, renderer, |_| true)
    }

    /// Redraws the station markers of one town from live data.
    pub fn refresh_overlay(
        &mut self,
        town: &str,
        store: &dyn DataAccess,
        renderer: &dyn MapRenderer,
    ) -> store::Result<()> {
        self.refresh_where(store, renderer, |t| t == town)
    }

    fn refresh_where(
        &mut self,
        store: &dyn DataAccess,
        renderer: &dyn MapRenderer,
        wanted: impl Fn(&str) -> bool,
    ) -> store::Result<()> {
        let mut coords = store
            .coords_by_town()?
            .into_iter()
            .map(|c| (c.town, c.coords))
            .collect::<BTreeMap<_, _>>();

        for (town, surface) in self.surfaces.iter_mut().filter(|(t, _)| wanted(t.as_str())) {
            let live = coords.remove(town).unwrap_or_default();
            surface.live_bounds = BoundingBox::around(&live, LIVE_PADDING);
            surface.overlay = renderer.scatter(&surface.base, &surface.extent, &station_points(&live));
            surface.displayed = match &self.polygon {
                Some(p) if &p.town == town => {
                    renderer.polygon(&surface.overlay, &surface.extent, &p.points)
                }
                _ => surface.overlay.clone(),
            };
            debug!("refreshed map of {} with {} stations", town, live.len());
        }
        Ok(())
    }

    /// Parses and draws a selection polygon. Malformed text leaves every
    /// piece of state as it was.
    pub fn submit_polygon(
        &mut self,
        town: &str,
        text: &str,
        renderer: &dyn MapRenderer,
    ) -> Result<SelectionPolygon, PolygonError> {
        if !self.surfaces.contains_key(town) {
            return Err(PolygonError::UnknownTown(town.to_owned()));
        }
        let polygon = SelectionPolygon::parse(town, text)?;

        if self.current.as_deref() != Some(town) {
            self.switch_town(town)?;
        }
        if let Some(surface) = self.surfaces.get_mut(town) {
            surface.displayed = renderer.polygon(&surface.overlay, &surface.extent, &polygon.points);
        }
        self.polygon = Some(polygon.clone());
        Ok(polygon)
    }

    pub fn clear_polygon(&mut self, town: &str) {
        if self.polygon.as_ref().is_some_and(|p| p.town == town) {
            self.discard_polygon();
        }
    }

    /// Makes `town` the shown map, dropping a polygon drawn on another town.
    /// Returns the seed text for the polygon input.
    pub fn switch_town(&mut self, town: &str) -> Result<Option<String>, PolygonError> {
        if !self.surfaces.contains_key(town) {
            return Err(PolygonError::UnknownTown(town.to_owned()));
        }
        if self.polygon.as_ref().is_some_and(|p| p.town != town) {
            self.discard_polygon();
        }
        self.current = Some(town.to_owned());
        Ok(self.seed_text(town))
    }

    /// Called when the map view is hidden.
    pub fn leave(&mut self) {
        self.discard_polygon();
    }

    /// The live bounding box of `town` as polygon text, so that submitting
    /// it unchanged selects the whole town.
    pub fn seed_text(&self, town: &str) -> Option<String> {
        let bounds = self.surfaces.get(town)?.live_bounds?;
        serde_json::to_string(&bounds.corners()).ok()
    }

    pub fn polygon_query(&self) -> Option<Query> {
        self.polygon
            .as_ref()
            .map(|p| Query::Polygon(p.query_points()))
    }

    fn discard_polygon(&mut self) {
        if let Some(p) = self.polygon.take() {
            if let Some(surface) = self.surfaces.get_mut(&p.town) {
                surface.displayed = surface.overlay.clone();
            }
            debug!("cleared polygon on {}", p.town);
        }
    }
}
