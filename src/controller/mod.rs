pub mod editor;
pub mod map;
pub mod results;

use image::DynamicImage;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::TownConfig,
    controller::{
        editor::EditForm,
        map::{MapSelection, PolygonError},
        results::{Query, ResultList},
    },
    render::{MapRenderer, Raster},
    station::{stats::StatsQuery, Field, StationFeature, TownFilter},
    store::{DataAccess, StoreError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Form,
    Map,
    Stats,
}

/// Outcome of the last store-backed action.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status {
    #[default]
    Ready,
    Failed { message: String, retryable: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Polygon(#[from] PolygonError),

    #[error("No selection polygon is drawn")]
    NoPolygon,

    #[error("Editing needs exactly one selected station")]
    NotSingleSelection,

    #[error("The edit panel is closed")]
    EditorClosed,

    #[error("The edited station is no longer in the result list")]
    StaleEdit,

    #[error("Failed to export results: {0}")]
    Export(#[from] geojson::Error),
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct AppState {
    pub view: View,
    pub results: ResultList,
    pub maps: MapSelection,
    pub editor: EditForm,
    pub status: Status,
}

/// The single top-level controller. It owns the application state and the
/// collaborators, and sequences the cross-controller flows.
pub struct App {
    store: Box<dyn DataAccess>,
    renderer: Box<dyn MapRenderer>,
    state: AppState,
}

impl App {
    /// Renders every town's base map and the first overlays.
    pub fn new(
        store: Box<dyn DataAccess>,
        renderer: Box<dyn MapRenderer>,
        towns: Vec<(TownConfig, DynamicImage)>,
    ) -> Result<Self, StoreError> {
        let mut maps = MapSelection::new(renderer.as_ref(), towns);
        maps.refresh_all(store.as_ref(), renderer.as_ref())?;

        Ok(Self {
            store,
            renderer,
            state: AppState {
                view: View::default(),
                results: ResultList::default(),
                maps,
                editor: EditForm::default(),
                status: Status::default(),
            },
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn displayed_map(&self, town: &str) -> Option<&Raster> {
        self.state.maps.surface(town).map(|s| s.displayed())
    }

    fn track<T>(&mut self, result: Result<T, AppError>) -> Result<T, AppError> {
        match &result {
            Ok(_) => self.state.status = Status::Ready,
            Err(AppError::Store(e)) => {
                warn!("store call failed: {}", e);
                self.state.status = Status::Failed {
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                };
            }
            Err(_) => {}
        }
        result
    }

    fn run_query(&mut self, query: Query) -> Result<(), AppError> {
        self.state.editor.close();
        let result = self
            .state
            .results
            .run_query(self.store.as_ref(), &query)
            .map_err(AppError::from);
        self.track(result)
    }

    pub fn search(&mut self, town: &str, name: &str) -> Result<(), AppError> {
        self.run_query(Query::TownAndName {
            town: TownFilter::parse(town),
            name: name.to_owned(),
        })
    }

    pub fn search_by_stats(&mut self, query: StatsQuery) -> Result<(), AppError> {
        self.run_query(Query::Stats(query))
    }

    pub fn search_by_polygon(&mut self) -> Result<(), AppError> {
        let query = self.state.maps.polygon_query().ok_or(AppError::NoPolygon)?;
        self.run_query(query)
    }

    pub fn sort_by(&mut self, field: Option<Field>) {
        self.state.editor.close();
        self.state.results.sort_by(field);
    }

    pub fn select(&mut self, keys: &[String]) {
        self.state.editor.close();
        self.state.results.select(keys);
    }

    pub fn select_all(&mut self) {
        self.state.editor.close();
        self.state.results.select_all();
    }

    pub fn select_none(&mut self) {
        self.state.editor.close();
        self.state.results.select_none();
    }

    pub fn bulk_activate(&mut self, state: bool) -> Result<(), AppError> {
        self.state.editor.close();
        let result = self.bulk_activate_inner(state);
        self.track(result)
    }

    fn bulk_activate_inner(&mut self, state: bool) -> Result<(), AppError> {
        let changed = self
            .state
            .results
            .bulk_activate(self.store.as_mut(), state)?;
        if !changed.is_empty() {
            info!("set active={} on {} stations", state, changed.len());
            self.state
                .maps
                .refresh_all(self.store.as_ref(), self.renderer.as_ref())?;
        }
        Ok(())
    }

    pub fn bulk_delete(&mut self) -> Result<(), AppError> {
        self.state.editor.close();
        let result = self.bulk_delete_inner();
        self.track(result)
    }

    fn bulk_delete_inner(&mut self) -> Result<(), AppError> {
        let removed = self.state.results.bulk_delete(self.store.as_mut())?;
        if removed > 0 {
            info!("deleted {} stations", removed);
            self.state
                .maps
                .refresh_all(self.store.as_ref(), self.renderer.as_ref())?;
        }
        Ok(())
    }

    pub fn open_editor(&mut self) -> Result<(), AppError> {
        let index = self
            .state
            .results
            .editor_target()
            .ok_or(AppError::NotSingleSelection)?;
        let record = &self.state.results.records()[index];
        self.state.editor.open(index, record);
        Ok(())
    }

    pub fn set_edit_field(&mut self, field: Field, value: &str) -> Result<(), AppError> {
        if self.state.editor.set_value(field, value) {
            Ok(())
        } else {
            Err(AppError::EditorClosed)
        }
    }

    pub fn close_editor(&mut self) {
        self.state.editor.close();
    }

    /// Pushes the edited record to the store, merges it into the result
    /// list, redraws the maps it appears on and closes the panel.
    pub fn submit_edit(&mut self) -> Result<(), AppError> {
        let result = self.submit_edit_inner();
        self.track(result)
    }

    fn submit_edit_inner(&mut self) -> Result<(), AppError> {
        let (index, merged) = self
            .state
            .editor
            .submission()
            .ok_or(AppError::EditorClosed)?;
        let previous_town = match self.state.results.records().get(index) {
            Some(current) if current.id == merged.id => current.town.clone(),
            _ => return Err(AppError::StaleEdit),
        };

        self.store.update(&merged)?;
        let town = merged.town.clone();
        self.state.results.replace(index, merged);
        self.state.editor.close();

        for t in [previous_town.as_str(), town.as_str()].into_iter().dedup() {
            self.state
                .maps
                .refresh_overlay(t, self.store.as_ref(), self.renderer.as_ref())?;
        }
        Ok(())
    }

    pub fn show_view(&mut self, view: View) {
        if self.state.view == View::Map && view != View::Map {
            self.state.maps.leave();
        }
        self.state.view = view;
    }

    /// Shows the map of `town` and returns the polygon seed text.
    pub fn switch_town(&mut self, town: &str) -> Result<Option<String>, AppError> {
        let seed = self.state.maps.switch_town(town)?;
        self.state.view = View::Map;
        Ok(seed)
    }

    pub fn submit_polygon(&mut self, town: &str, text: &str) -> Result<(), PolygonError> {
        self.state
            .maps
            .submit_polygon(town, text, self.renderer.as_ref())
            .map(|_| ())
    }

    pub fn clear_polygon(&mut self, town: &str) {
        self.state.maps.clear_polygon(town);
    }

    pub fn towns(&mut self) -> Result<Vec<String>, AppError> {
        let result = self.store.list_towns().map_err(AppError::from);
        self.track(result)
    }

    /// The current results as a GeoJSON feature collection.
    pub fn export_geojson(&self) -> Result<String, AppError> {
        let features = self
            .state
            .results
            .records()
            .iter()
            .map(StationFeature::from)
            .collect::<Vec<_>>();
        Ok(geojson::ser::to_feature_collection_string(&features)?)
    }
}

/// Lyon (A active, B inactive) and Lille (C active) on blank 8x8 maps.
#[cfg(test)]
pub(crate) fn fixture() -> (App, crate::store::testing::Probe) {
    use std::path::PathBuf;

    use image::{Rgba, RgbaImage};

    use crate::{
        render::{canvas::ImageRenderer, BoundingBox},
        station::station,
        store::testing::RecordingStore,
    };

    let mut a = station("1", "Lyon", "A", true);
    a.set_position(45.75, 4.83);
    let mut b = station("2", "Lyon", "B", false);
    b.set_position(45.76, 4.85);
    let mut c = station("3", "Lille", "C", true);
    c.set_position(50.63, 3.06);
    let (store, probe) = RecordingStore::new(vec![a, b, c]);

    let towns = [("Lille", [3.00, 3.10, 50.60, 50.70]), ("Lyon", [4.80, 4.90, 45.70, 45.80])]
        .into_iter()
        .map(|(name, extent)| {
            let config = TownConfig {
                name: name.to_owned(),
                image_path: PathBuf::from(format!("{name}.png")),
                extent: BoundingBox::from_array(extent),
            };
            let image = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]));
            (config, DynamicImage::ImageRgba8(image))
        })
        .collect();

    let app = App::new(Box::new(store), Box::new(ImageRenderer::new(60, 40)), towns).unwrap();
    (app, probe)
}
