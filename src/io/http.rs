//! Management API and Prometheus metrics endpoint
//!
//! One hyper server carries both surfaces:
//! - GET  /health                        liveness probe
//! - GET  /metrics                       Prometheus text exposition
//! - GET  /stats                         counter stats + queue depth
//! - GET  /sensors                       latest state per sensor
//! - GET  /sensors/{id}                  latest state for one sensor
//! - GET  /sensors/{id}/history?limit=N  bounded state history
//! - DELETE /sensors/{id}/history        drop one sensor's history
//! - DELETE /sensors/history             drop all state history
//! - GET  /count/history?limit=N         official-count transitions
//! - GET  /rules                         registered rule labels
//! - POST /rules                         register a rule (no predicate)
//! - DELETE /rules/{event}/{index}       remove a rule
//! - POST /counter/reset                 drop all counter state
//! - POST /queue/clear                   discard pending actions

use crate::domain::message::EventName;
use crate::services::pipeline::Pipeline;
use crate::services::rules::{ActionTemplate, EventRule};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Rule registration request body
#[derive(Debug, Deserialize)]
struct RuleSpec {
    event: EventName,
    #[serde(default)]
    label: Option<String>,
    actions: Vec<ActionTemplate>,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with i64 value (the official count can be negative)
fn write_gauge_i64(output: &mut String, name: &str, help: &str, site: &str, val: i64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(pipeline: &Pipeline, site: &str) -> String {
    let summary = pipeline.metrics().summary();
    let stats = pipeline.stats();
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "roomcast_messages_received_total",
        "Sensor messages received (before try_send)",
        MetricType::Counter,
        site,
        summary.messages_received,
    );
    write_metric(
        &mut output,
        "roomcast_messages_dropped_total",
        "Sensor messages dropped due to channel full",
        MetricType::Counter,
        site,
        summary.messages_dropped,
    );
    write_metric(
        &mut output,
        "roomcast_messages_malformed_total",
        "Payloads rejected at the MQTT boundary",
        MetricType::Counter,
        site,
        summary.messages_malformed,
    );
    write_metric(
        &mut output,
        "roomcast_events_processed_total",
        "Event messages run through the rule registry",
        MetricType::Counter,
        site,
        summary.events_processed,
    );
    write_metric(
        &mut output,
        "roomcast_states_processed_total",
        "State messages ingested by the counter",
        MetricType::Counter,
        site,
        summary.states_processed,
    );
    write_metric(
        &mut output,
        "roomcast_count_changes_total",
        "Official count changes",
        MetricType::Counter,
        site,
        summary.count_changes,
    );
    write_metric(
        &mut output,
        "roomcast_actions_completed_total",
        "Actions executed successfully",
        MetricType::Counter,
        site,
        summary.actions_completed,
    );
    write_metric(
        &mut output,
        "roomcast_actions_failed_total",
        "Actions that failed during execution",
        MetricType::Counter,
        site,
        summary.actions_failed,
    );

    write_gauge_i64(
        &mut output,
        "roomcast_official_count",
        "Current fused occupancy count",
        site,
        stats.counter.official_count,
    );
    write_metric(
        &mut output,
        "roomcast_active_sensors",
        "Sensors with a non-stale reading",
        MetricType::Gauge,
        site,
        stats.counter.active_sensors as u64,
    );
    write_metric(
        &mut output,
        "roomcast_queue_depth",
        "Pending actions in the dispatch queue",
        MetricType::Gauge,
        site,
        stats.queue_len as u64,
    );

    output
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, json!({"error": message}).to_string())
}

/// Parse a `limit=N` query parameter, ignoring everything else
fn parse_limit(query: Option<&str>) -> Option<usize> {
    let query = query?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "limit" {
            value.parse().ok()
        } else {
            None
        }
    })
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    pipeline: Arc<Pipeline>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let limit = parse_limit(req.uri().query());
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),

        (&Method::GET, ["metrics"]) => {
            let body = format_prometheus_metrics(&pipeline, &site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }

        (&Method::GET, ["stats"]) => match serde_json::to_string(&pipeline.stats()) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(_) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed"),
        },

        (&Method::GET, ["sensors"]) => {
            let states = pipeline.all_latest_states();
            json_response(StatusCode::OK, serde_json::to_string(&states).unwrap_or_default())
        }

        (&Method::GET, ["sensors", id]) => match pipeline.latest_state(id) {
            Some(state) => {
                json_response(StatusCode::OK, serde_json::to_string(&state).unwrap_or_default())
            }
            None => json_error(StatusCode::NOT_FOUND, "unknown sensor"),
        },

        (&Method::GET, ["sensors", id, "history"]) => {
            let history = pipeline.state_history(id, limit);
            json_response(StatusCode::OK, serde_json::to_string(&history).unwrap_or_default())
        }

        (&Method::DELETE, ["sensors", id, "history"]) => {
            pipeline.clear_state_history(Some(id));
            json_response(StatusCode::OK, json!({"ok": true}).to_string())
        }

        (&Method::DELETE, ["sensors", "history"]) => {
            pipeline.clear_state_history(None);
            json_response(StatusCode::OK, json!({"ok": true}).to_string())
        }

        (&Method::GET, ["count", "history"]) => {
            let history = pipeline.count_history(limit);
            json_response(StatusCode::OK, serde_json::to_string(&history).unwrap_or_default())
        }

        (&Method::GET, ["rules"]) => {
            let rules: Vec<_> = pipeline
                .rule_labels()
                .into_iter()
                .map(|(event, labels)| json!({"event": event.as_str(), "rules": labels}))
                .collect();
            json_response(StatusCode::OK, serde_json::to_string(&rules).unwrap_or_default())
        }

        (&Method::POST, ["rules"]) => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => return Ok(json_error(StatusCode::BAD_REQUEST, "unreadable body")),
            };
            match serde_json::from_slice::<RuleSpec>(&body) {
                Ok(spec) => {
                    let label = spec
                        .label
                        .unwrap_or_else(|| format!("api_rule_{}", spec.event.as_str().to_lowercase()));
                    pipeline.add_rule(spec.event, EventRule::new(label.clone(), spec.actions));
                    json_response(StatusCode::CREATED, json!({"ok": true, "label": label}).to_string())
                }
                Err(e) => {
                    warn!(error = %e, "rule_spec_rejected");
                    json_error(StatusCode::BAD_REQUEST, &format!("invalid rule spec: {e}"))
                }
            }
        }

        (&Method::DELETE, ["rules", event, index]) => {
            match (event.parse::<EventName>(), index.parse::<usize>()) {
                (Ok(event), Ok(index)) => {
                    if pipeline.remove_rule(event, index) {
                        json_response(StatusCode::OK, json!({"ok": true}).to_string())
                    } else {
                        json_error(StatusCode::NOT_FOUND, "no rule at that index")
                    }
                }
                _ => json_error(StatusCode::BAD_REQUEST, "invalid event name or index"),
            }
        }

        (&Method::POST, ["counter", "reset"]) => {
            pipeline.reset_counter();
            json_response(StatusCode::OK, json!({"ok": true}).to_string())
        }

        (&Method::POST, ["queue", "clear"]) => {
            let cleared = pipeline.clear_queue();
            json_response(StatusCode::OK, json!({"ok": true, "cleared": cleared}).to_string())
        }

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail"),
    };

    Ok(response)
}

/// Start the management API HTTP server
pub async fn start_api_server(
    port: u16,
    pipeline: Arc<Pipeline>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let pipeline = pipeline.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let pipeline = pipeline.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, pipeline, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
