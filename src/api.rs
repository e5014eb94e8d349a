use actix_web::dev::Server;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use crate::metrics::Metrics;
use crate::service::OrderService;

// ============================================================================
// HTTP Read API
// ============================================================================
//
// GET /api/v1/orders/{order_uid}  → order JSON | 404 | 500
// GET /api/v1/orders              → 400 (no id)
// GET /metrics                    → Prometheus text format
// GET /health                     → liveness + cached order count
//
// ============================================================================

const SERVICE_NAME: &str = "order_tracker";

pub struct AppState {
    pub service: Arc<OrderService>,
    pub metrics: Arc<Metrics>,
}

/// Build the HTTP server. The caller drives the returned `Server` and keeps
/// its handle for graceful shutdown.
pub fn server(state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<Server> {
    tracing::info!(host = %host, port, "Starting HTTP server");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(state.clone()))
            .configure(routes)
    })
    .disable_signals()
    .bind((host, port))?
    .run();

    Ok(server)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/orders", web::get().to(missing_order_id))
        .route("/api/v1/orders/", web::get().to(missing_order_id))
        .route("/api/v1/orders/{order_uid}", web::get().to(get_order))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler));
}

fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

async fn get_order(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let order_uid = path.into_inner();
    let order_uid = order_uid.trim();
    if order_uid.is_empty() {
        return HttpResponse::BadRequest().json(error_body("Missing order ID"));
    }

    match state.service.get_order(order_uid).await {
        Ok(order) => HttpResponse::Ok().json(order.as_ref()),
        Err(e) if e.is_not_found() => HttpResponse::NotFound().json(error_body("Order not found")),
        Err(e) => {
            tracing::error!(order_uid = %order_uid, error = %e, "Failed to serve order");
            HttpResponse::InternalServerError().json(error_body("Internal server error"))
        }
    }
}

async fn missing_order_id() -> impl Responder {
    HttpResponse::BadRequest().json(error_body("Missing order ID"))
}

async fn metrics_handler(state: web::Data<AppState>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "cached_orders": state.service.cached_orders(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruOrderCache;
    use crate::testing::{sample_order, MemoryOrderStore};
    use actix_web::http::StatusCode;
    use actix_web::test;
    use std::sync::atomic::Ordering;

    async fn state_with(store: Arc<MemoryOrderStore>) -> Arc<AppState> {
        let metrics = Arc::new(Metrics::new().unwrap());
        let service = Arc::new(OrderService::new(
            store,
            Arc::new(LruOrderCache::new(10)),
            metrics.clone(),
        ));
        service.init().await.unwrap();
        Arc::new(AppState { service, metrics })
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::from($state.clone()))
                    .configure(routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_get_order_returns_json() {
        let store = Arc::new(MemoryOrderStore::new());
        store.insert(sample_order("uniqueOrderID123"));
        let state = state_with(store).await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/v1/orders/uniqueOrderID123").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["orderUid"], "uniqueOrderID123");
        assert_eq!(body["items"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["payment"]["amount"], "150.00");
    }

    #[actix_web::test]
    async fn test_unknown_order_is_404() {
        let state = state_with(Arc::new(MemoryOrderStore::new())).await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/v1/orders/nope").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Order not found");
    }

    #[actix_web::test]
    async fn test_missing_order_id_is_400() {
        let state = state_with(Arc::new(MemoryOrderStore::new())).await;
        let app = app!(state);

        for uri in ["/api/v1/orders", "/api/v1/orders/"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn test_store_failure_is_500() {
        let store = Arc::new(MemoryOrderStore::new());
        let state = state_with(store.clone()).await;
        store.fail_reads.store(true, Ordering::SeqCst);
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/v1/orders/o-1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({ "error": "Internal server error" }));
    }

    #[actix_web::test]
    async fn test_health_reports_cached_orders() {
        let store = Arc::new(MemoryOrderStore::new());
        store.insert(sample_order("o-1"));
        store.insert(sample_order("o-2"));
        let state = state_with(store).await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "order_tracker");
        assert_eq!(body["cached_orders"], 2);
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_exposes_counters() {
        let store = Arc::new(MemoryOrderStore::new());
        store.insert(sample_order("o-1"));
        let state = state_with(store).await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/v1/orders/o-1").to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body = test::call_and_read_body(&app, req).await;
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.contains("orders_cache_lookups_total{result=\"hit\"} 1"));
        assert!(text.contains("orders_cache_entries 1"));
    }
}
