use std::{convert::Infallible, time::SystemTime};

use log::warn;
use serde::{Deserialize, Serialize};
use warp::{http::Method, Filter};

use crate::{user_connected, SharedRelay};

/// Origins permitted to reach the HTTP and websocket routes, normalised to
/// `scheme://host[:port]`.
///
/// Entries that are not a valid origin are dropped with a warning.
#[derive(Debug, Clone, Default)]
pub struct AllowedOrigins {
    origins: Vec<String>,
}

impl AllowedOrigins {
    pub fn new<I, S>(origins: I) -> AllowedOrigins
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for raw in origins {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            match url::Url::parse(raw).map(|url| url.origin()) {
                Ok(origin) if origin.is_tuple() => normalized.push(origin.ascii_serialization()),
                _ => warn!("ignoring invalid allowed origin {:?}", raw),
            }
        }
        AllowedOrigins { origins: normalized }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.origins.iter().map(String::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    username: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    connected_users: usize,
    timestamp: String,
}

fn with_relay(
    relay: SharedRelay,
) -> impl warp::Filter<Extract = (SharedRelay,), Error = Infallible> + Clone {
    warp::any().map(move || relay.clone())
}

/// Cross-origin policy for every route. Requests without an `Origin` header
/// pass untouched; listed origins get CORS headers (credentials allowed) and
/// preflight answers; anything else is rejected with 403.
fn cors_policy(allowed: &AllowedOrigins) -> warp::filters::cors::Builder {
    warp::cors()
        .allow_origins(allowed.iter())
        .allow_methods(vec![Method::GET, Method::POST])
        .allow_headers(vec!["content-type"])
        .allow_credentials(true)
}

async fn upgrade_connection(
    params: ConnectParams,
    ws: warp::ws::Ws,
    relay: SharedRelay,
) -> Result<impl warp::Reply, Infallible> {
    // A missing name is registered as-is; names are never validated.
    let username = params.username.unwrap_or_default();
    Ok(ws.on_upgrade(move |socket| user_connected(socket, username, relay)))
}

// GET /ws?username={name} -> websocket upgrade
fn ws_upgrade(
    relay: SharedRelay,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("ws")
        .and(warp::query::<ConnectParams>())
        .and(warp::ws())
        .and(with_relay(relay))
        .and_then(upgrade_connection)
}

async fn health(relay: SharedRelay) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&Health {
        status: "ok",
        connected_users: relay.connection_count().await,
        timestamp: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
    }))
}

// GET /health -> connection count and server time
fn health_check(
    relay: SharedRelay,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("health")
        .and(warp::get())
        .and(with_relay(relay))
        .and_then(health)
}

pub fn build_filters(
    relay: SharedRelay,
    allowed: AllowedOrigins,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    ws_upgrade(relay.clone())
        .or(health_check(relay))
        .with(cors_policy(&allowed))
}
