//! Debug HTTP server exposing application stats and prometheus metrics.

use std::sync::Arc;

use actix_web::web::Data;
use actix_web::{get, App, HttpResponse, HttpServer, Responder};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Stats;
use crate::{Error, APP_NAME, VERSION};

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigServer {
    /// Port of the debug HTTP server.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

#[derive(Clone)]
struct RuntimeInfo {
    started_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct RuntimeStats {
    name: &'static str,
    version: &'static str,
    started_at: DateTime<Utc>,
    uptime_seconds: i64,
    instance_index: i32,
}

#[get("/")]
async fn index() -> impl Responder {
    let body = format!(
        r#"<a href="https://github.com/rakutentech/cf-metrics-refinery">{APP_NAME}</a>
<ul>
  <li><a href="/stats/runtime">stats/runtime</a></li>
  <li><a href="/stats/app">stats/app</a></li>
  <li><a href="/metrics">metrics</a></li>
</ul>
"#
    );
    HttpResponse::Ok().content_type("text/html").body(body)
}

#[get("/stats/app")]
async fn stats_app(stats: Data<Arc<Stats>>) -> impl Responder {
    match stats.json() {
        Ok(body) => HttpResponse::Ok()
            .content_type("application/json")
            .body(body),
        Err(err) => {
            HttpResponse::InternalServerError().body(format!("Internal Server Error: {err}\n"))
        }
    }
}

#[get("/stats/runtime")]
async fn stats_runtime(rt: Data<RuntimeInfo>, stats: Data<Arc<Stats>>) -> impl Responder {
    let now = Utc::now();
    HttpResponse::Ok().json(RuntimeStats {
        name: APP_NAME,
        version: VERSION,
        started_at: rt.started_at,
        uptime_seconds: (now - rt.started_at).num_seconds(),
        instance_index: stats.snapshot().instance_index,
    })
}

#[get("/metrics")]
async fn metrics(stats: Data<Arc<Stats>>) -> impl Responder {
    let families = stats.registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&families, &mut buffer).unwrap();
    HttpResponse::Ok().body(buffer)
}

/// Binds the debug server and returns its running future; the caller awaits
/// it alongside the pipeline.
pub fn start(cfg: &ConfigServer, stats: Arc<Stats>) -> Result<actix_web::dev::Server, Error> {
    let runtime = RuntimeInfo {
        started_at: Utc::now(),
    };
    let port = cfg.port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(stats.clone()))
            .app_data(Data::new(runtime.clone()))
            .service(index)
            .service(stats_app)
            .service(stats_runtime)
            .service(metrics)
    })
    .bind(("0.0.0.0", port))?
    .shutdown_timeout(5)
    .run();

    info!(port, "debug server listening");
    Ok(server)
}

#[cfg(test)]
mod tests {
    use actix_web::{body::to_bytes, test};

    use super::*;
    use crate::debug::Counter;

    #[actix_web::test]
    async fn stats_app_serves_the_counters_json() {
        let stats = Arc::new(Stats::with_instance_index(2));
        stats.inc(Counter::Consume, 3);

        let app = test::init_service(
            App::new()
                .app_data(Data::new(stats.clone()))
                .service(stats_app),
        )
        .await;
        let req = test::TestRequest::get().uri("/stats/app").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["consume"], 3);
        assert_eq!(json["instance_index"], 2);
    }

    #[actix_web::test]
    async fn metrics_serves_prometheus_text() {
        let stats = Arc::new(Stats::with_instance_index(0));
        stats.inc(Counter::Write, 1);

        let app = test::init_service(
            App::new()
                .app_data(Data::new(stats.clone()))
                .service(metrics),
        )
        .await;
        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("cfmr_write_total 1"));
    }
}
