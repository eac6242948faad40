use std::convert::Infallible;

use actix_web::http::header;
use actix_web::{web, HttpResponse, Responder};
use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::ai_provider::{GenerationRequest, ProviderError};
use shared::dto::{BatchOptions, BatchReport, Language, TaskStatus, TemplateFilter};
use shared::stream_parser::StreamEvent;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

type ApiResult = Result<HttpResponse, ApiError>;

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok", "service": "template-api" }))
}

pub async fn not_found() -> ApiResult {
    Err(ApiError::NotFound("route not found".into()))
}

async fn queue_status(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.jobs.status().await)
}

async fn queue_job(state: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let id = path.into_inner();
    let job = state
        .jobs
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(HttpResponse::Ok().json(job))
}

#[derive(Deserialize)]
struct ListQuery {
    category_id: Option<Uuid>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_templates(state: web::Data<AppState>, query: web::Query<ListQuery>) -> ApiResult {
    let filter = TemplateFilter {
        category_id: query.category_id,
        limit: Some(query.limit.unwrap_or(100).clamp(1, 500)),
        offset: query.offset.map(|o| o.max(0)),
        visible_only: true,
    };
    let templates = state.store.list_templates(&filter).await?;
    Ok(HttpResponse::Ok().json(json!({
        "count": templates.len(),
        "templates": templates,
    })))
}

async fn get_template(state: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let id = path.into_inner();
    let template = state
        .store
        .get_template(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("template {id} not found")))?;
    Ok(HttpResponse::Ok().json(template))
}

#[derive(Deserialize)]
struct VersionsQuery {
    project_id: Uuid,
}

async fn template_versions(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<VersionsQuery>,
) -> ApiResult {
    let versions = state
        .store
        .versions_for(path.into_inner(), query.project_id)
        .await?;
    Ok(HttpResponse::Ok().json(versions))
}

#[derive(Deserialize)]
struct BatchGenerateRequest {
    project_id: Uuid,
    template_ids: Vec<Uuid>,
    #[serde(default)]
    language: Language,
}

async fn batch_generate(
    state: web::Data<AppState>,
    web::Json(body): web::Json<BatchGenerateRequest>,
) -> ApiResult {
    info!(project_id = %body.project_id, templates = body.template_ids.len(), "batch generate");
    let results = state
        .orchestrator
        .generate_for_project(body.project_id, &body.template_ids, body.language)
        .await?;
    let generated = results
        .iter()
        .filter(|r| r.status == TaskStatus::Generated)
        .count();
    Ok(HttpResponse::Ok().json(json!({
        "project_id": body.project_id,
        "generated": generated,
        "failed": results.len() - generated,
        "results": results,
    })))
}

#[derive(Serialize)]
struct BatchRun {
    job_id: Uuid,
    #[serde(flatten)]
    report: BatchReport,
}

async fn batch_production(
    state: web::Data<AppState>,
    web::Json(options): web::Json<BatchOptions>,
) -> ApiResult {
    let job = state.jobs.start_guarded(options.dry_run).await;
    let job_id = job.id();
    info!(%job_id, dry_run = options.dry_run, "batch production requested");
    match state.orchestrator.run(&options).await {
        Ok(report) => {
            job.complete(report.clone()).await;
            Ok(HttpResponse::Ok().json(BatchRun { job_id, report }))
        }
        Err(e) => {
            job.fail(e.to_string()).await;
            Err(e.into())
        }
    }
}

fn require_prompt(req: &GenerationRequest) -> Result<(), ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".into()));
    }
    Ok(())
}

async fn ai_generate(
    state: web::Data<AppState>,
    web::Json(req): web::Json<GenerationRequest>,
) -> ApiResult {
    require_prompt(&req)?;
    let result = state.ai.generate_content(&req).await;
    if !result.is_success() {
        let message = result
            .error
            .unwrap_or_else(|| "generation failed".to_string());
        return Err(ApiError::Upstream(message));
    }
    Ok(HttpResponse::Ok().json(result))
}

/// One SSE frame for the browser, or `None` for events it has no use for.
fn sse_frame(event: Result<StreamEvent, ProviderError>) -> Option<web::Bytes> {
    let payload = match event {
        Ok(StreamEvent::Delta(text)) => json!({ "content": text }).to_string(),
        Ok(StreamEvent::Usage(tokens)) => json!({ "usage": { "total_tokens": tokens } }).to_string(),
        Ok(StreamEvent::Error(message)) => json!({ "error": message }).to_string(),
        Ok(StreamEvent::Done) => "[DONE]".to_string(),
        Ok(StreamEvent::Malformed(raw)) => {
            warn!(payload = %shared::utils::truncate_for_log(&raw, 200), "dropping malformed stream payload");
            return None;
        }
        Err(e) => json!({ "error": e.to_string() }).to_string(),
    };
    Some(web::Bytes::from(format!("data: {payload}\n\n")))
}

async fn ai_stream(
    state: web::Data<AppState>,
    web::Json(req): web::Json<GenerationRequest>,
) -> ApiResult {
    require_prompt(&req)?;
    let upstream = state.ai.stream_content(&req).await?;
    let body = upstream.filter_map(|event| future::ready(sse_frame(event).map(Ok::<_, Infallible>)));
    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(body))
}

#[derive(Deserialize)]
struct PagesRequest {
    version_id: Option<Uuid>,
    limit: Option<i64>,
}

async fn generate_pages(
    state: web::Data<AppState>,
    web::Json(body): web::Json<PagesRequest>,
) -> ApiResult {
    match body.version_id {
        Some(version_id) => {
            let pages = state.pages.publish(version_id).await?;
            Ok(HttpResponse::Ok().json(pages))
        }
        None => {
            let limit = body.limit.unwrap_or(50).clamp(1, 500);
            let summary = state.pages.publish_missing(limit).await?;
            Ok(HttpResponse::Ok().json(summary))
        }
    }
}

fn default_num() -> u32 {
    10
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_num")]
    num: u32,
}

async fn search_company(
    state: web::Data<AppState>,
    web::Json(body): web::Json<SearchRequest>,
) -> ApiResult {
    let client = state
        .search
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("search is not configured".into()))?;
    if body.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    let results = client.search(&body.query, body.num).await?;
    Ok(HttpResponse::Ok().json(json!({
        "query": body.query.trim(),
        "results": results,
    })))
}

/// Registers every route plus extractor error handlers that answer with the
/// JSON error envelope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(1 << 20)
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .route("/health", web::get().to(health))
    .route("/queue/status", web::get().to(queue_status))
    .route("/queue/jobs/{id}", web::get().to(queue_job))
    .route("/templates/list", web::get().to(list_templates))
    .route("/templates/batch-generate", web::post().to(batch_generate))
    .route("/templates/batch-production", web::post().to(batch_production))
    .route("/templates/{id}", web::get().to(get_template))
    .route("/templates/{id}/versions", web::get().to(template_versions))
    .route("/ai/generate", web::post().to(ai_generate))
    .route("/ai/stream", web::post().to(ai_stream))
    .route("/pages/generate", web::post().to(generate_pages))
    .route("/search/company", web::post().to(search_company));
}
