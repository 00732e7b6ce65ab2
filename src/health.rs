use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let summaries = state.call_summaries();

    let mut enqueued = 0;
    let mut dropped = 0;
    let mut write_errors = 0;
    let mut packets_sent = 0;
    let mut packets_received = 0;
    for summary in &summaries {
        enqueued += summary.bridge.enqueued;
        dropped += summary.bridge.dropped;
        write_errors += summary.bridge.write_errors;
        packets_sent += summary.telephony.packets_sent;
        packets_received += summary.telephony.packets_received;
    }

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "calls": {
            "total": summaries.len(),
            "active": state.active_call_count()
        },
        "media": {
            "chunks_enqueued": enqueued,
            "chunks_dropped": dropped,
            "write_errors": write_errors,
            "rtp_packets_sent": packets_sent,
            "rtp_packets_received": packets_received
        },
        "backend": {
            "model": config.gemini.model,
            "api_key_configured": !config.gemini.api_key.trim().is_empty()
        },
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let field = |name: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };
            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}
