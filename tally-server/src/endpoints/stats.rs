//! Read access to the live metrics, the flush history and the worker's bookkeeping.
//!
//! Reads never fail. If the aggregator or the sink is unavailable, the endpoints respond with
//! empty data.

use std::fmt::Write;

use axum::Json;
use tally_common::UnixTimestamp;
use tally_metrics::{
    Counters, CurrentMetrics, Gauges, GetCounters, GetCurrent, GetGauges, GetHistory,
    GetLastReport, GetMessageStats, GetTimers, HistoryResponse, Timers,
};

use crate::extractors::FilterParams;
use crate::service::ServiceState;
use crate::services::sink::GetSinkStats;

/// Returns the text of the last flush report.
pub async fn report(state: ServiceState) -> String {
    state
        .aggregator()
        .send(GetLastReport)
        .await
        .unwrap_or_default()
}

/// Returns uptime and the age of the last sink and message events in seconds.
pub async fn stats(state: ServiceState) -> String {
    let now = UnixTimestamp::now();
    let startup_time = state.startup_time();

    let sink = state.sink().send(GetSinkStats).await.ok();
    let messages = state.aggregator().send(GetMessageStats).await.ok();

    let last_flush = sink.map_or(startup_time, |s| s.last_flush);
    let last_exception = sink.map_or(startup_time, |s| s.last_exception);
    let last_msg_seen = messages.map_or(startup_time, |m| m.last_msg_seen);
    let bad_lines_seen = messages.map_or(0, |m| m.bad_lines_seen);

    let mut text = String::new();
    writeln!(text, "uptime: {}", now.secs_since(startup_time)).ok();
    writeln!(text, "graphite.last_flush: {}", now.secs_since(last_flush)).ok();
    writeln!(text, "graphite.last_exception: {}", now.secs_since(last_exception)).ok();
    writeln!(text, "messages.last_msg_seen: {}", now.secs_since(last_msg_seen)).ok();
    writeln!(text, "messages.bad_lines_seen: {bad_lines_seen}").ok();
    text
}

/// Returns live counters.
pub async fn counters(state: ServiceState, params: FilterParams) -> Json<Counters> {
    let message = GetCounters { filter: params.f };
    Json(state.aggregator().send(message).await.unwrap_or_default())
}

/// Returns live timer samples.
pub async fn timers(state: ServiceState, params: FilterParams) -> Json<Timers> {
    let message = GetTimers { filter: params.f };
    Json(state.aggregator().send(message).await.unwrap_or_default())
}

/// Returns live gauges.
pub async fn gauges(state: ServiceState, params: FilterParams) -> Json<Gauges> {
    let message = GetGauges { filter: params.f };
    Json(state.aggregator().send(message).await.unwrap_or_default())
}

/// Returns all live metrics.
pub async fn current(state: ServiceState, params: FilterParams) -> Json<CurrentMetrics> {
    let message = GetCurrent { filter: params.f };
    Json(state.aggregator().send(message).await.unwrap_or_default())
}

/// Returns the flush history, optionally limited to the most recent entries.
pub async fn history(state: ServiceState, params: FilterParams) -> Json<HistoryResponse> {
    let message = GetHistory {
        filter: params.f,
        limit: params.counter,
    };

    let response = state.aggregator().send(message).await;
    Json(response.unwrap_or_else(|_| HistoryResponse {
        interval: state.config().collector().flush_interval,
        results: Vec::new(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode, header};
    use tally_metrics::MergeDatagram;

    use crate::testutils::{TestServer, get};

    #[tokio::test]
    async fn test_counters_filtered() {
        let server = TestServer::new();
        server.merge(b"api.hits:1|c");
        server.merge(b"db.hits:2|c");

        let (status, body) = server.call(get("/stats/counters")).await;
        assert_eq!(status, StatusCode::OK);
        insta::assert_snapshot!(body, @r#"{"api.hits":1.0,"db.hits":2.0}"#);

        let (_, body) = server.call(get("/stats/counters?f=db")).await;
        insta::assert_snapshot!(body, @r#"{"db.hits":2.0}"#);
    }

    #[tokio::test]
    async fn test_post_filters() {
        let server = TestServer::new();
        server.merge(b"api.latency:12|ms");
        server.merge(b"db.latency:30|ms");

        let request = server
            .request(Method::POST, "/stats/timers")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("f=api".into())
            .unwrap();
        let (_, body) = server.call(request).await;
        insta::assert_snapshot!(body, @r#"{"api.latency":[12.0]}"#);

        let request = server
            .request(Method::POST, "/stats/timers")
            .header(header::CONTENT_TYPE, "application/json")
            .body(r#"{"f":"db"}"#.into())
            .unwrap();
        let (_, body) = server.call(request).await;
        insta::assert_snapshot!(body, @r#"{"db.latency":[30.0]}"#);
    }

    #[tokio::test]
    async fn test_current() {
        let server = TestServer::new();
        server.merge(b"queue.size:7|g");
        server.merge(b"jobs:1|c");

        let (_, body) = server.call(get("/stats/current")).await;
        insta::assert_snapshot!(body, @r#"{"counters":{"jobs":1.0},"timers":{},"gauges":{"queue.size":7.0}}"#);

        let (_, body) = server.call(get("/stats/gauges?f=missing")).await;
        insta::assert_snapshot!(body, @"{}");
    }

    #[tokio::test]
    async fn test_history_empty() {
        let server = TestServer::new();
        let (status, body) = server.call(get("/stats/history?counter=5")).await;
        assert_eq!(status, StatusCode::OK);
        insta::assert_snapshot!(body, @r#"{"interval":10000,"results":[]}"#);
    }

    #[tokio::test]
    async fn test_report_before_first_flush() {
        let server = TestServer::new();
        let (status, body) = server.call(get("/stats/report")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn test_stats_text() {
        let server = TestServer::new();
        server.aggregator().send(MergeDatagram::parse(b"a:1|c:2:3|g"));

        let (status, body) = server.call(get("/stats/stats")).await;
        assert_eq!(status, StatusCode::OK);

        let keys: Vec<_> = body
            .lines()
            .filter_map(|line| line.split_once(": "))
            .map(|(key, _)| key)
            .collect();
        similar_asserts::assert_eq!(
            keys,
            vec![
                "uptime",
                "graphite.last_flush",
                "graphite.last_exception",
                "messages.last_msg_seen",
                "messages.bad_lines_seen",
            ]
        );
        assert!(body.ends_with("messages.bad_lines_seen: 1\n"));
    }
}
