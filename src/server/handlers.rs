use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::geo::Coordinate;
use crate::location::{
    LocationError, LocationPackage, LocationQuery, QualityReport, QueryContext, ResolvedLocation,
};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

impl From<LocationError> for ApiError {
    fn from(e: LocationError) -> Self {
        let status = match e {
            LocationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LocationError::NoCandidatesFound { .. } => StatusCode::NOT_FOUND,
        };
        ApiError(status, e.to_string())
    }
}

// ─── Query parameters ────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct PlaceParams {
    pub name: Option<String>,
    pub lang: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub category: Option<String>,
    pub hint: Option<String>,
}

impl PlaceParams {
    fn to_query(&self) -> Result<LocationQuery, ApiError> {
        let name = self.name.as_deref().unwrap_or("");
        if name.trim().is_empty() {
            return Err(ApiError(StatusCode::BAD_REQUEST, "Missing 'name' parameter".into()));
        }
        let query = LocationQuery::new(name, self.lang.as_deref().unwrap_or("en"))?;
        Ok(query.with_context(QueryContext {
            region: self.region.clone(),
            country: self.country.clone(),
            country_code: self.country_code.clone(),
            category: self.category.clone(),
            hint: self.hint.clone(),
        }))
    }
}

// ─── GET /api/resolve ────────────────────────────────────────────

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PlaceParams>,
) -> Result<Json<ResolvedLocation>, ApiError> {
    let start = Instant::now();
    let query = params.to_query()?;
    let resolved = state.resolver.resolve(&query).await?;

    tracing::info!(
        query = %query.name,
        language = %query.language,
        selected = %resolved.candidate.id,
        cached = resolved.from_cache,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "GET /api/resolve"
    );
    Ok(Json(resolved))
}

// ─── POST /api/package ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PackageRequest {
    pub name: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub context: QueryContext,
    #[serde(default)]
    pub chapters: Vec<String>,
}

pub async fn package(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PackageRequest>,
) -> Result<Json<LocationPackage>, ApiError> {
    let start = Instant::now();
    let query = LocationQuery::new(&body.name, body.lang.as_deref().unwrap_or("en"))?
        .with_context(body.context);
    let package = state.resolver.resolve_package(&query, &body.chapters).await?;

    tracing::info!(
        query = %query.name,
        chapters = package.chapters.len(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "POST /api/package"
    );
    Ok(Json(package))
}

// ─── GET /api/quality ────────────────────────────────────────────

#[derive(Serialize)]
pub struct QualityResponse {
    pub location: ResolvedLocation,
    pub report: QualityReport,
}

pub async fn quality(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PlaceParams>,
) -> Result<Json<QualityResponse>, ApiError> {
    let query = params.to_query()?;
    let (location, report) = state.resolver.quality_report(&query).await?;
    Ok(Json(QualityResponse { location, report }))
}

// ─── GET /api/sites ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct SiteSummary {
    pub id: String,
    pub name: String,
    pub center: Coordinate,
    pub poi_count: usize,
}

pub async fn sites(State(state): State<Arc<AppState>>) -> Json<Vec<SiteSummary>> {
    let list = state
        .resolver
        .datasets()
        .sites
        .iter()
        .map(|s| SiteSummary {
            id: s.id.clone(),
            name: s.display_name().to_string(),
            center: s.center,
            poi_count: s.pois.len(),
        })
        .collect();
    Json(list)
}
