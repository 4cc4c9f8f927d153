use actix_web::{web, HttpResponse, Responder};
use chrono::TimeDelta;
use serde_json::Value;

use crate::models::{InstanceSession, Program, UsageSession};
use crate::state::AppState;

fn seconds(duration: Option<TimeDelta>) -> Option<f64> {
    duration.map(|d| d.num_milliseconds() as f64 / 1000.0)
}

fn summary(p: &Program) -> Value {
    serde_json::json!({
        "name": p.exe_name,
        "description": p.description,
        "path": p.path,
        "initial_pid": p.initial_pid,
        "is_running": p.is_running(),
        "total_sessions": p.total_sessions(),
        "total_run_time_secs": seconds(Some(p.total_run_time())),
        "running_since": p.current_session().map(|s| s.started_at),
    })
}

fn instance(i: &InstanceSession) -> Value {
    serde_json::json!({
        "pid": i.pid,
        "started_at": i.started_at,
        "ended_at": i.ended_at,
        "duration_secs": seconds(i.duration()),
    })
}

fn session(s: &UsageSession) -> Value {
    serde_json::json!({
        "started_at": s.started_at,
        "ended_at": s.ended_at,
        "is_active": s.is_active(),
        "active_instances": s.active_instances(),
        "duration_secs": seconds(s.duration()),
        "instances": s.instances().iter().map(instance).collect::<Vec<_>>(),
    })
}

pub async fn list_programs(data: web::Data<AppState>) -> impl Responder {
    let snapshot = data.snapshot();
    let list: Vec<_> = snapshot.iter().map(summary).collect();

    HttpResponse::Ok().json(list)
}

pub async fn get_program(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();

    match data.lookup(&name) {
        Some(program) => {
            let mut body = summary(&program);
            body["sessions"] = program.sessions().iter().map(session).collect();
            HttpResponse::Ok().json(body)
        }
        None => HttpResponse::NotFound().json(serde_json::json!({
            "status": "error",
            "message": format!("Program '{}' not found", name)
        })),
    }
}
