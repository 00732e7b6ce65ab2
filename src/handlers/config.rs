use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration, with the API key redacted.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "gemini": {
                "model": config.gemini.model,
                "endpoint": config.gemini.endpoint,
                "setup_timeout_secs": config.gemini.setup_timeout_secs,
                "api_key_configured": !config.gemini.api_key.trim().is_empty()
            },
            "session": config.session,
            "media": config.media,
            "logging": config.logging
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_config_hides_api_key() {
        let mut config = AppConfig::default();
        config.gemini.api_key = "super-secret".to_string();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config)))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["gemini"]["api_key_configured"], true);
        assert_eq!(body["config"]["media"]["codec"], "PCMU");
        assert!(!body.to_string().contains("super-secret"));
    }
}
