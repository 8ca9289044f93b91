use crate::config::AppConfig;
use crate::device::DeviceManager;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let resident: Vec<serde_json::Value> = state
        .models
        .resident()
        .into_iter()
        .map(|model| {
            json!({
                "id": model.key.to_string(),
                "loaded_at": model.loaded_at.to_rfc3339(),
                "in_flight": model.in_flight
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
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
            "error_rate": error_rate(&metrics),
            "active_transcriptions": metrics.active_transcriptions
        },
        "memory": get_memory_info(),
        "devices": DeviceManager::summary(config.models.gpu_count),
        "models": {
            "resident_count": resident.len(),
            "resident": resident,
            "defaults": {
                "transcription": config.models.transcription_model,
                "alignment": config.models.alignment_model,
                "diarization": config.models.diarization_model,
                "device": config.models.device,
                "compute_type": config.models.compute_type
            }
        },
        "system": get_system_status(&config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<serde_json::Value> = metrics
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
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "active_transcriptions": metrics.active_transcriptions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "models": {
            "resident_count": state.models.resident().len()
        },
        "performance": {
            "max_concurrent_transcriptions": state.transcription_limit(),
            "available_permits": state.transcriptions.available_permits()
        }
    }))
}

fn error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                let bytes = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .unwrap_or(0)
                        * 1024
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = bytes();
                } else if line.starts_with("VmSize:") {
                    vm_size = bytes();
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

/// Load classification from how many transcription permits are in use.
fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let limit = config.performance.max_concurrent_transcriptions;
    let usage = if limit > 0 {
        metrics.active_transcriptions as f64 / limit as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "transcription_usage_percent": (usage * 100.0).round(),
        "max_transcriptions": limit,
        "current_transcriptions": metrics.active_transcriptions,
        "load_warnings": if usage > 0.8 {
            vec!["High transcription load - consider increasing max_concurrent_transcriptions"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_system_status_thresholds() {
        let config = AppConfig::default();
        let mut metrics = AppMetrics::default();
        assert_eq!(get_system_status(&config, &metrics)["status"], "normal");

        metrics.active_transcriptions = 3;
        assert_eq!(get_system_status(&config, &metrics)["status"], "moderate_load");

        metrics.active_transcriptions = 4;
        let status = get_system_status(&config, &metrics);
        assert_eq!(status["status"], "high_load");
        assert_eq!(status["load_warnings"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_health_check_reports_models() {
        let state = test_state(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["models"]["resident_count"], 0);
        assert_eq!(body["models"]["defaults"]["transcription"], "base");

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["performance"]["max_concurrent_transcriptions"], 4);
    }
}
