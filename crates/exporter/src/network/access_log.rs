//! Access log for failed requests
//!
//! Scrapes and health checks hit the exporter constantly, so only
//! exchanges with a status of 400 or above are logged, in combined log
//! format under the `access` tracing target.

use axum::body::HttpBody;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{self, HeaderName};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Local};
use std::net::SocketAddr;
use tracing::info;

/// Details of a finished exchange
#[derive(Debug, Clone)]
pub struct Exchange<'a> {
    pub peer: Option<SocketAddr>,
    pub request_line: &'a str,
    pub status: u16,
    pub size: Option<u64>,
    pub referer: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

/// Combined log format line, `None` below status 400
pub fn access_log_line(exchange: &Exchange<'_>, now: DateTime<Local>) -> Option<String> {
    if exchange.status < 400 {
        return None;
    }
    Some(format!(
        "{} - - [{}] \"{}\" {} {} \"{}\" \"{}\"",
        exchange
            .peer
            .map(|peer| peer.ip().to_string())
            .unwrap_or_else(|| "-".to_string()),
        now.format("%d/%b/%Y:%H:%M:%S %z"),
        exchange.request_line,
        exchange.status,
        exchange
            .size
            .map(|size| size.to_string())
            .unwrap_or_else(|| "-".to_string()),
        exchange.referer.unwrap_or("-"),
        exchange.user_agent.unwrap_or("-"),
    ))
}

/// Middleware that writes [`access_log_line`] for every response
pub async fn log_failures(request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let request_line = format!(
        "{} {} {:?}",
        request.method(),
        request.uri(),
        request.version()
    );
    let referer = header_value(&request, header::REFERER);
    let user_agent = header_value(&request, header::USER_AGENT);

    let response = next.run(request).await;

    let exchange = Exchange {
        peer,
        request_line: &request_line,
        status: response.status().as_u16(),
        size: response.body().size_hint().exact(),
        referer: referer.as_deref(),
        user_agent: user_agent.as_deref(),
    };
    if let Some(line) = access_log_line(&exchange, Local::now()) {
        info!(target: "access", "{}", line);
    }
    response
}

fn header_value(request: &Request, name: HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn exchange(status: u16) -> Exchange<'static> {
        Exchange {
            peer: Some("[::1]:40000".parse().unwrap()),
            request_line: "GET /nope HTTP/1.1",
            status,
            size: Some(10),
            referer: None,
            user_agent: Some("curl/8.5"),
        }
    }

    #[test]
    fn test_only_errors_are_logged() {
        let now = Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(access_log_line(&exchange(200), now), None);
        assert_eq!(access_log_line(&exchange(399), now), None);

        let line = access_log_line(&exchange(404), now).unwrap();
        assert!(line.starts_with("::1 - - [01/Mar/2024:12:30:00 "));
        assert!(line.ends_with("\"GET /nope HTTP/1.1\" 404 10 \"-\" \"curl/8.5\""));
    }

    #[test]
    fn test_unknown_peer_and_size() {
        let now = Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let mut failed = exchange(500);
        failed.peer = None;
        failed.size = None;

        let line = access_log_line(&failed, now).unwrap();
        assert!(line.starts_with("- - - ["));
        assert!(line.contains("\" 500 - \""));
    }
}
