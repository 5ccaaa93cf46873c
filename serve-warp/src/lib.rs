//! Warp runtime for the Inngest SDK.
//!
//! `inngest-sdk` implements the serve protocol over plain request/response
//! values. This crate is the glue between that protocol and `warp`: it
//! mounts a [`ServeHandler`] at its configured path, converts warp's
//! request primitives into a [`ServeRequest`], and renders the handler's
//! [`ServeResponse`] back out.
//!
//! # Example
//!
//! ```ignore
//! use inngest_serve_warp::serve;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = inngest_sdk::Inngest::from_env("shop");
//!     let handler = inngest_sdk::ServeHandler::new(client, vec![import_products()])?;
//!     serve(handler, ([127, 0, 0, 1], 8080)).await;
//!     Ok(())
//! }
//! ```

use {
    inngest_sdk::{
        serve::{ServeRequest, ServeResponse},
        ServeHandler,
    },
    std::{collections::HashMap, net::SocketAddr, sync::Arc},
    warp::{
        filters::{host::Authority, path::FullPath},
        http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode},
        hyper::body::Bytes,
        Filter,
        Rejection,
        Reply,
    },
};

/// Mount path used when the config does not set a serve path.
pub const DEFAULT_SERVE_PATH: &str = "/api/inngest";

/// Build the warp filter serving `handler` at its configured path.
///
/// The serve path comes from the handler's config
/// ([`inngest_sdk::Config::serve_path`]) and falls back to
/// [`DEFAULT_SERVE_PATH`]. All methods are routed to the handler; it
/// answers 405 for the ones it does not support.
pub fn routes(
    handler: Arc<ServeHandler>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let path = handler
        .config()
        .serve_path()
        .unwrap_or(DEFAULT_SERVE_PATH)
        .to_string();

    let base_path = path
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(warp::any().boxed(), |filter, segment| {
            filter.and(warp::path(segment.to_string())).boxed()
        });

    warp::method()
        .and(base_path)
        .and(warp::path::end())
        .and(warp::path::full())
        .and(warp::header::optional::<Authority>("X-Forwarded-Host"))
        .and(warp::header::optional::<String>("X-Forwarded-Proto"))
        .and(warp::filters::host::optional())
        .and(warp::query::raw().or(warp::any().map(String::new)).unify())
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
        .and(warp::any().map(move || handler.clone()))
        .and_then(dispatch)
}

/// Serve `handler` on `addr` until the process exits.
///
/// Initializes logging from the config's log level (falling back to
/// `RUST_LOG`) and tags the handler with the warp framework label.
pub async fn serve(handler: ServeHandler, addr: impl Into<SocketAddr>) {
    init_logging(handler.config().log_level());

    let handler = Arc::new(handler.with_framework("warp"));
    log::info!(
        "serving {} at {}",
        handler.client().app_id(),
        handler.config().serve_path().unwrap_or(DEFAULT_SERVE_PATH),
    );

    warp::serve(routes(handler)).run(addr).await
}

async fn dispatch(
    method: Method,
    path: FullPath,
    forwarded_host: Option<Authority>,
    forwarded_proto: Option<String>,
    host: Option<Authority>,
    raw_query: String,
    headers: HeaderMap,
    body: Bytes,
    handler: Arc<ServeHandler>,
) -> Result<warp::reply::Response, Rejection> {
    // The most external host/scheme win: that is what the orchestrator
    // must call back.
    let host = forwarded_host.or(host).map(|authority| authority.to_string());

    let req = ServeRequest {
        method: method.as_str().to_string(),
        path: path.as_str().to_string(),
        host,
        scheme: forwarded_proto,
        query: parse_query(&raw_query),
        headers: lowercased_headers(&headers),
        body: body.to_vec(),
    };

    Ok(into_warp_response(handler.handle(req).await))
}

fn lowercased_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((percent_decode(key)?, percent_decode(value)?))
        })
        .collect()
}

fn percent_decode(input: &str) -> Option<String> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.bytes();
    while let Some(byte) = bytes.next() {
        match byte {
            b'%' => {
                let hi = bytes.next()?;
                let lo = bytes.next()?;
                let hex = [hi, lo];
                let hex = std::str::from_utf8(&hex).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
            }
            b'+' => out.push(b' '),
            other => out.push(other),
        }
    }
    String::from_utf8(out).ok()
}

fn into_warp_response(resp: ServeResponse) -> warp::reply::Response {
    let mut response = warp::reply::Response::new(warp::hyper::Body::from(resp.body));
    *response.status_mut() =
        StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let headers = response.headers_mut();
    for (name, value) in resp.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }

    response
}

fn init_logging(level: Option<&str>) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    let _ = builder.try_init();
}
