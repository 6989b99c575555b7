use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use actix_web::{
    http::StatusCode, middleware, web, App as HttpApp, HttpResponse, HttpServer, ResponseError,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    controller::{map::PolygonError, App, AppError, View},
    station::{
        stats::{Comparator, QueryError, StatsQuery},
        Field,
    },
    store::StoreError,
};

/// The one controller instance and the bound on each call into it.
pub struct Shared {
    app: Mutex<App>,
    timeout: Duration,
}

impl Shared {
    pub fn new(app: App, timeout: Duration) -> Self {
        Self {
            app: Mutex::new(app),
            timeout,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker thread failed")]
    Blocking,

    #[error("Unknown town {0:?}")]
    UnknownTown(String),

    #[error("Failed to encode map: {0}")]
    Encoding(#[from] image::ImageError),
}

impl ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::App(e) => e.is_retryable(),
            ApiError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::App(AppError::Store(e)) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::App(AppError::Store(StoreError::UnknownStation(_))) => StatusCode::NOT_FOUND,
            ApiError::App(AppError::Store(StoreError::InvalidQuery(_))) => StatusCode::BAD_REQUEST,
            ApiError::App(AppError::Polygon(PolygonError::UnknownTown(_))) | ApiError::UnknownTown(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::App(AppError::Polygon(_)) | ApiError::Query(_) => StatusCode::BAD_REQUEST,
            ApiError::App(
                AppError::NoPolygon
                | AppError::NotSingleSelection
                | AppError::EditorClosed
                | AppError::StaleEdit,
            ) => StatusCode::CONFLICT,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        }))
    }
}

/// Runs `f` against the controller on the blocking pool, bounded by the
/// configured timeout. A timed-out call keeps running and holds the lock
/// until it returns. A call that panicked leaves the lock poisoned; the next
/// one takes the state over as it was left.
async fn dispatch<F, T>(shared: &web::Data<Shared>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut App) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let data = shared.clone();
    let task = web::block(move || {
        let mut app = data.app.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *app)
    });

    match actix_web::rt::time::timeout(shared.timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ApiError::Blocking),
        Err(_) => Err(ApiError::Timeout(shared.timeout)),
    }
}

/// View model of everything a client draws.
fn snapshot(app: &App) -> Value {
    let state = app.state();
    json!({
        "view": state.view,
        "status": state.status,
        "count": state.results.count(),
        "rows": state.results.rows(),
        "sort": state.results.sort_field(),
        "selection": state.results.selection(),
        "actions": state.results.actions(),
        "editor": state.editor.fields(),
        "towns": state.maps.towns().collect::<Vec<_>>(),
        "current_town": state.maps.current_town(),
        "polygon": state.maps.polygon(),
        "polygon_search": state.maps.polygon_search_enabled(),
    })
}

/// Applies one action and answers with the resulting view model.
async fn act<F>(shared: &web::Data<Shared>, f: F) -> Result<HttpResponse, ApiError>
where
    F: FnOnce(&mut App) -> Result<(), ApiError> + Send + 'static,
{
    let state = dispatch(shared, move |app| {
        f(app)?;
        Ok(snapshot(app))
    })
    .await?;
    Ok(HttpResponse::Ok().json(state))
}

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    town: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct StatsRequest {
    comparator: String,
    ratio: f64,
    hour_start: u32,
    hour_end: u32,
    weekday_start: u32,
    weekday_end: u32,
}

impl StatsRequest {
    fn into_query(self) -> Result<StatsQuery, QueryError> {
        let comparator: Comparator = self.comparator.parse()?;
        StatsQuery::new(
            comparator,
            self.ratio,
            (self.hour_start, self.hour_end),
            (self.weekday_start, self.weekday_end),
        )
    }
}

#[derive(Deserialize)]
struct SortRequest {
    field: Option<Field>,
}

#[derive(Deserialize)]
struct SelectRequest {
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct ActivateRequest {
    state: bool,
}

#[derive(Deserialize)]
struct FieldRequest {
    key: Field,
    value: String,
}

#[derive(Deserialize)]
struct ViewRequest {
    view: View,
}

async fn get_state(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    act(&shared, |_| Ok(())).await
}

async fn get_towns(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    let towns = dispatch(&shared, |app| Ok(app.towns()?)).await?;
    Ok(HttpResponse::Ok().json(towns))
}

async fn search(
    shared: web::Data<Shared>,
    body: web::Json<SearchRequest>,
) -> Result<HttpResponse, ApiError> {
    let SearchRequest { town, name } = body.into_inner();
    act(&shared, move |app| Ok(app.search(&town, &name)?)).await
}

async fn search_stats(
    shared: web::Data<Shared>,
    body: web::Json<StatsRequest>,
) -> Result<HttpResponse, ApiError> {
    let query = body.into_inner().into_query()?;
    act(&shared, move |app| Ok(app.search_by_stats(query)?)).await
}

async fn search_polygon(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    act(&shared, |app| Ok(app.search_by_polygon()?)).await
}

async fn sort(shared: web::Data<Shared>, body: web::Json<SortRequest>) -> Result<HttpResponse, ApiError> {
    let field = body.field;
    act(&shared, move |app| {
        app.sort_by(field);
        Ok(())
    })
    .await
}

async fn select(
    shared: web::Data<Shared>,
    body: web::Json<SelectRequest>,
) -> Result<HttpResponse, ApiError> {
    let keys = body.into_inner().keys;
    act(&shared, move |app| {
        app.select(&keys);
        Ok(())
    })
    .await
}

async fn select_all(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    act(&shared, |app| {
        app.select_all();
        Ok(())
    })
    .await
}

async fn select_none(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    act(&shared, |app| {
        app.select_none();
        Ok(())
    })
    .await
}

async fn activate(
    shared: web::Data<Shared>,
    body: web::Json<ActivateRequest>,
) -> Result<HttpResponse, ApiError> {
    let state = body.state;
    act(&shared, move |app| Ok(app.bulk_activate(state)?)).await
}

async fn delete(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    act(&shared, |app| Ok(app.bulk_delete()?)).await
}

async fn open_editor(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    act(&shared, |app| Ok(app.open_editor()?)).await
}

async fn edit_field(
    shared: web::Data<Shared>,
    body: web::Json<FieldRequest>,
) -> Result<HttpResponse, ApiError> {
    let FieldRequest { key, value } = body.into_inner();
    act(&shared, move |app| Ok(app.set_edit_field(key, &value)?)).await
}

async fn submit_edit(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    act(&shared, |app| Ok(app.submit_edit()?)).await
}

async fn close_editor(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    act(&shared, |app| {
        app.close_editor();
        Ok(())
    })
    .await
}

async fn show_view(shared: web::Data<Shared>, body: web::Json<ViewRequest>) -> Result<HttpResponse, ApiError> {
    let view = body.view;
    act(&shared, move |app| {
        app.show_view(view);
        Ok(())
    })
    .await
}

async fn switch_town(shared: web::Data<Shared>, town: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let town = town.into_inner();
    let (seed, state) = dispatch(&shared, move |app| {
        let seed = app.switch_town(&town)?;
        Ok((seed, snapshot(app)))
    })
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "seed": seed, "state": state })))
}

async fn submit_polygon(
    shared: web::Data<Shared>,
    town: web::Path<String>,
    body: String,
) -> Result<HttpResponse, ApiError> {
    let town = town.into_inner();
    let response = dispatch(&shared, move |app| match app.submit_polygon(&town, &body) {
        Ok(()) => Ok(json!({ "applied": true, "state": snapshot(app) })),
        Err(PolygonError::UnknownTown(t)) => Err(ApiError::UnknownTown(t)),
        Err(e) => {
            debug!("ignored polygon for {}: {}", town, e);
            Ok(json!({ "applied": false }))
        }
    })
    .await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn clear_polygon(shared: web::Data<Shared>, town: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let town = town.into_inner();
    act(&shared, move |app| {
        app.clear_polygon(&town);
        Ok(())
    })
    .await
}

async fn map_image(shared: web::Data<Shared>, town: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let town = town.into_inner();
    let png = dispatch(&shared, move |app| {
        let raster = app
            .displayed_map(&town)
            .ok_or_else(|| ApiError::UnknownTown(town.clone()))?;
        Ok(raster.to_png()?)
    })
    .await?;
    Ok(HttpResponse::Ok().content_type("image/png").body(png))
}

async fn export(shared: web::Data<Shared>) -> Result<HttpResponse, ApiError> {
    let body = dispatch(&shared, |app| Ok(app.export_geojson()?)).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/geo+json")
        .body(body))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/state", web::get().to(get_state))
        .route("/towns", web::get().to(get_towns))
        .route("/search", web::post().to(search))
        .route("/search/stats", web::post().to(search_stats))
        .route("/search/polygon", web::post().to(search_polygon))
        .route("/sort", web::post().to(sort))
        .route("/select", web::post().to(select))
        .route("/select/all", web::post().to(select_all))
        .route("/select/none", web::post().to(select_none))
        .route("/activate", web::post().to(activate))
        .route("/delete", web::post().to(delete))
        .route("/edit", web::post().to(open_editor))
        .route("/edit/field", web::post().to(edit_field))
        .route("/edit/submit", web::post().to(submit_edit))
        .route("/edit/close", web::post().to(close_editor))
        .route("/view", web::post().to(show_view))
        .route("/map/{town}", web::post().to(switch_town))
        .service(
            web::resource("/map/{town}/polygon")
                .route(web::post().to(submit_polygon))
                .route(web::delete().to(clear_polygon)),
        )
        .route("/map/{town}/image", web::get().to(map_image))
        .route("/results.geojson", web::get().to(export));
}

/// Serves the controller on one worker so that calls stay sequential.
pub async fn run(app: App, bind: &str, timeout: Duration) -> std::io::Result<()> {
    let shared = web::Data::new(Shared::new(app, timeout));

    info!("listening on {}", bind);
    HttpServer::new(move || {
        HttpApp::new()
            .app_data(shared.clone())
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    .workers(1)
    .bind(bind)?
    .run()
    .await
}
