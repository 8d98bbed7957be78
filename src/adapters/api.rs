use actix_web::{HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};

use crate::app::runtime::timestamp_to_iso8601;
use crate::app::services::{PowerEventSink, RuntimeServices, ServiceError, StatusQueryHandler};
use crate::domain::auto_off::{MachineSnapshot, TimerHandle};

#[derive(Clone)]
pub struct ApiState {
    pub services: RuntimeServices,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimersResponse {
    pub delay: bool,
    pub early_confirm: bool,
    pub poll: bool,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub phase: String,
    pub cycle_id: Option<String>,
    pub run_confirmed: bool,
    pub monitoring_started_at: Option<String>,
    pub timers: TimersResponse,
}

impl From<MachineSnapshot> for StatusResponse {
    fn from(snapshot: MachineSnapshot) -> Self {
        let armed = |timer: Option<TimerHandle>| timer.is_some();
        Self {
            phase: snapshot.phase.as_str().to_string(),
            cycle_id: snapshot.cycle_id.map(|id| id.to_string()),
            run_confirmed: snapshot.run_confirmed,
            monitoring_started_at: snapshot.monitoring_started_at.map(timestamp_to_iso8601),
            timers: TimersResponse {
                delay: armed(snapshot.delay_timer),
                early_confirm: armed(snapshot.early_confirm_timer),
                poll: armed(snapshot.poll_timer),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PowerEventRequest {
    pub apower: f64,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(get_status_endpoint)
        .service(post_power_event_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/status")]
async fn get_status_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.services.current_status() {
        Ok(snapshot) => HttpResponse::Ok().json(StatusResponse::from(snapshot)),
        Err(error) => service_error_response(error),
    }
}

#[post("/events/power")]
async fn post_power_event_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<PowerEventRequest>,
) -> impl Responder {
    match state.services.submit_power_sample(body.apower) {
        Ok(()) => HttpResponse::Accepted().json(serde_json::json!({ "accepted": true })),
        Err(error) => service_error_response(error),
    }
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::StatusLockPoisoned => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "status lock poisoned"
            }))
        }
        ServiceError::EventLoopStopped => {
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": "event loop is not running"
            }))
        }
        ServiceError::InvalidSample(power_w) => {
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("apower must be a finite, non-negative number, got {power_w}")
            }))
        }
    }
}
