use std::path::{Component, Path};
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use floorforge_core::{generate, GenerationParams, Loader, PipelineStatus, TIMESTAMP_FORMAT};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router<L: Loader + 'static>(state: Arc<AppState<L>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate-floor-plan", post(create_floor_plan))
        .route("/floor-plans", get(list_floor_plans))
        .route("/floor-plans/images/{filename}", get(get_floor_plan_image))
        .route("/model-info", get(model_info))
        .fallback(not_found)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct GenerateFloorPlanRequest {
    #[serde(default)]
    prompt: Option<String>,
    num_inference_steps: Option<usize>,
    guidance_scale: Option<f64>,
    seed: Option<u64>,
}

async fn create_floor_plan<L: Loader + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(req): Json<GenerateFloorPlanRequest>,
) -> Result<Response, ApiError> {
    // Prompt validation happens before any pipeline work; a blank prompt must
    // not trigger materialization.
    let prompt = req.prompt.as_deref().unwrap_or("").trim().to_string();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest(
            "Invalid prompt: must be a non-empty string".to_string(),
        ));
    }
    if req.num_inference_steps == Some(0) {
        return Err(ApiError::BadRequest(
            "Invalid num_inference_steps: must be a positive integer".to_string(),
        ));
    }
    if let Some(scale) = req.guidance_scale {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ApiError::BadRequest(
                "Invalid guidance_scale: must be a positive number".to_string(),
            ));
        }
    }

    let params = GenerationParams {
        prompt,
        steps: req
            .num_inference_steps
            .unwrap_or(state.settings.default_num_inference_steps),
        guidance_scale: req
            .guidance_scale
            .unwrap_or(state.settings.default_guidance_scale),
        seed: req.seed,
    };

    // May block for a long time on first use while the model materializes.
    let handle = state.pipeline.get_or_load().await?;

    let id = Uuid::new_v4().to_string();
    let filename = format!("{id}.png");
    let output_dir = state.settings.generated_images_dir.clone();
    let model = handle.model.clone();
    let run_params = params.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        generate(model.as_ref(), &run_params, &output_dir, Some(filename))
    })
    .await
    .map_err(|err| ApiError::Internal(format!("generation task failed: {err}")))??;

    let body = json!({
        "id": outcome.metadata.id,
        "prompt": params.prompt,
        "imageUrl": image_url(&outcome.metadata.id),
        "generationTime": outcome.elapsed_seconds,
        "parameters": {
            "numInferenceSteps": params.steps,
            "guidanceScale": params.guidance_scale,
            "seed": params.seed,
        },
        "createdAt": outcome.metadata.created_at,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

fn image_url(id: &str) -> String {
    format!("/floor-plans/images/{id}.png")
}

async fn get_floor_plan_image<L: Loader + 'static>(
    State(state): State<Arc<AppState<L>>>,
    UrlPath(filename): UrlPath<String>,
) -> Result<Response, ApiError> {
    if !is_safe_filename(&filename) {
        return Err(ApiError::BadRequest(format!(
            "Invalid filename: {filename}"
        )));
    }
    let path = state.settings.generated_images_dir.join(&filename);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound(format!("No image named {filename}")))?;
    let content_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// A served filename must be a single normal path component; anything that
/// could climb out of the images directory is rejected.
fn is_safe_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

async fn list_floor_plans<L: Loader + 'static>(
    State(state): State<Arc<AppState<L>>>,
) -> Result<Json<Value>, ApiError> {
    let dir = state.settings.generated_images_dir.clone();
    let plans = tokio::task::spawn_blocking(move || collect_floor_plans(&dir))
        .await
        .map_err(|err| ApiError::Internal(format!("listing task failed: {err}")))?;
    Ok(Json(json!({ "floorPlans": plans })))
}

/// Pairs every image with its same-named `.json` sidecar; images without a
/// sidecar get a minimal entry synthesized from the file modification time.
fn collect_floor_plans(dir: &Path) -> Vec<Value> {
    let mut plans = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return plans,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        let sidecar = path.with_extension("json");
        let mut plan = std::fs::read_to_string(&sidecar)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| {
                json!({
                    "id": stem,
                    "createdAt": mtime_timestamp(&path),
                })
            });
        if let Value::Object(map) = &mut plan {
            map.insert(
                "imageUrl".to_string(),
                Value::String(format!("/floor-plans/images/{filename}")),
            );
        }
        plans.push(plan);
    }
    // Newest first; createdAt is ISO-8601 UTC so string order is time order.
    plans.sort_by(|a, b| {
        let a = a["createdAt"].as_str().unwrap_or("");
        let b = b["createdAt"].as_str().unwrap_or("");
        b.cmp(a)
    });
    plans
}

fn mtime_timestamp(path: &Path) -> String {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|time| DateTime::<Utc>::from(time).format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

async fn model_info<L: Loader + 'static>(State(state): State<Arc<AppState<L>>>) -> Json<Value> {
    match state.pipeline.info().await {
        PipelineStatus::NotLoaded => Json(json!({
            "status": "not_loaded",
            "message": "Model has not been loaded yet",
        })),
        PipelineStatus::Loaded {
            device,
            dtype,
            provenance,
            components,
        } => Json(json!({
            "status": "loaded",
            "device": device,
            "dtype": dtype,
            "provenance": provenance,
            "pipeline": { "components": components },
        })),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "FloorForge API" }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("The requested resource was not found".to_string())
}
