pub mod metrics;
pub mod programs;

pub use metrics::get_metrics;
pub use programs::{get_program, list_programs};

use actix_web::{HttpResponse, Responder};

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}
