use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.config();
    let uptime_seconds = state.get_uptime_seconds();

    // Without a credential every call fails upstream, but the process itself is fine.
    let status = if config.has_credential() { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "active_calls": metrics.active_calls,
            "total_calls": metrics.total_calls
        },
        "memory": get_memory_info(),
        "upstream": {
            "model": config.realtime.model,
            "credential_configured": config.has_credential()
        },
        "system": get_system_status(config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "calls": {
            "active": metrics.active_calls,
            "total": metrics.total_calls,
            "rejected": metrics.rejected_calls,
            "max_concurrent": state.config().bridge.max_concurrent_calls,
            "frames_sent": metrics.frames_sent,
            "caller_chunks_forwarded": metrics.caller_chunks_forwarded,
            "dropped_chunks": metrics.dropped_chunks,
            "responses": metrics.responses
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let max_calls = config.bridge.max_concurrent_calls;
    let call_usage = if max_calls > 0 {
        metrics.active_calls as f64 / max_calls as f64
    } else {
        0.0
    };

    let status = if call_usage > 0.9 {
        "high_load"
    } else if call_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "call_usage_percent": (call_usage * 100.0).round(),
        "max_calls": max_calls,
        "current_calls": metrics.active_calls,
        "load_warnings": if call_usage > 0.8 {
            vec!["High call volume - consider increasing bridge.max_concurrent_calls"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn test_health_reports_degraded_without_credential() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = actix_test::init_service(
            App::new()
                .app_data(state)
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["upstream"]["credential_configured"], false);
        assert_eq!(body["metrics"]["active_calls"], 0);
    }

    #[actix_web::test]
    async fn test_metrics_reports_calls() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        state.try_admit_call();

        let app = actix_test::init_service(
            App::new()
                .app_data(state)
                .route("/api/v1/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["calls"]["active"], 1);
        assert_eq!(body["calls"]["max_concurrent"], 50);
    }

    #[test]
    fn test_system_status_thresholds() {
        let mut config = AppConfig::default();
        config.bridge.max_concurrent_calls = 10;
        let metrics = AppMetrics { active_calls: 10, ..Default::default() };

        let status = get_system_status(&config, &metrics);
        assert_eq!(status["status"], "high_load");
        assert_eq!(status["load_warnings"].as_array().unwrap().len(), 1);
    }
}
