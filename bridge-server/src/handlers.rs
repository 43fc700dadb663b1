use crate::error::Result;
use crate::query::{Envelope, QueryService};
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;

fn pretty<T: Serialize>(value: &T) -> Result<HttpResponse> {
    let body = serde_json::to_string_pretty(value)?;
    Ok(HttpResponse::Ok().content_type("application/json").body(body))
}

/// Service index
pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "mq-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/health/{binding_name}", "/metrics", "/metrics/{binding_name}", "/prometheus"]
    }))
}

/// Health of every binding
pub async fn health(query: web::Data<QueryService>) -> Result<HttpResponse> {
    pretty(&Envelope::ok(query.health()))
}

/// Health of one binding
pub async fn binding_health(query: web::Data<QueryService>, name: web::Path<String>) -> Result<HttpResponse> {
    pretty(&Envelope::ok(query.binding_health(&name)?))
}

/// System rollup plus per-binding metrics
pub async fn metrics(query: web::Data<QueryService>) -> Result<HttpResponse> {
    pretty(&Envelope::ok(query.metrics()))
}

/// Metrics of one binding
pub async fn binding_metrics(query: web::Data<QueryService>, name: web::Path<String>) -> Result<HttpResponse> {
    pretty(&Envelope::ok(query.binding_metrics(&name)?))
}

/// Prometheus text exposition
pub async fn prometheus() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(bindings::exporter::gather_text())
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/health", web::get().to(health))
        .route("/health/{binding_name}", web::get().to(binding_health))
        .route("/metrics", web::get().to(metrics))
        .route("/metrics/{binding_name}", web::get().to(binding_metrics))
        .route("/prometheus", web::get().to(prometheus));
}
