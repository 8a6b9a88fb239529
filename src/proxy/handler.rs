use crate::proxy::context::{full_body, BoxBody, ConnectionContext, RequestContext};
use crate::proxy::filter::{Filter, FilterResult, LocalReply};
use crate::routing::{CompiledRoute, RouteEntry};
use crate::server::GatewayState;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::StatusCode;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Handle an incoming HTTP request through a phased lifecycle:
///
/// 1. ROUTE_MATCH: route matching (a miss is not fatal here)
/// 2. ON_REQUEST: filter chain on headers only; a filter may answer with a
///    local reply, in which case the body is never read
/// 3. READ_BODY: drain the body under the route's `max_body_bytes`
/// 4. RESPOND: the route's direct response, or 404
/// 5. ON_RESPONSE: filter chain in reverse, for local replies too
/// 6. LOG: metrics and access log
pub async fn handle_request<B>(
    req: Request<B>,
    state: GatewayState,
    connection: Arc<ConnectionContext>,
) -> Result<Response<BoxBody>, Infallible>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();
    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())
        .unwrap_or("")
        .to_string();
    let uri_path = parts.uri.path().to_string();
    let method = parts.method.as_str().to_string();

    // Trust the left-most X-Forwarded-For entry if present (assumes a trusted
    // reverse proxy in front), otherwise the TCP peer address.
    let client_ip = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|s| s.trim().parse::<std::net::IpAddr>().ok())
        .unwrap_or_else(|| connection.peer_addr().ip());

    let is_grpc = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/grpc"));

    let mut ctx = RequestContext::new(host, uri_path, method, client_ip, parts.headers, connection);
    let route = phase_route_match(&mut ctx, &state);

    let mut resp = match phase_on_request(&state.filters, &mut ctx) {
        Some(reply) => {
            debug!(
                "proxy: local reply, route={}, details={}",
                ctx.route_name(),
                reply.details
            );
            reply.into_response(is_grpc)
        }
        None => match phase_read_body(body, route.as_deref(), &mut ctx).await {
            Ok(()) => direct_response(route.as_deref()),
            Err(resp) => resp,
        },
    };

    phase_on_response(&state.filters, &ctx, &mut resp);
    phase_log(&ctx, &resp);
    Ok(resp)
}

fn phase_route_match(ctx: &mut RequestContext, state: &GatewayState) -> Option<Arc<CompiledRoute>> {
    let route = state
        .route_table
        .match_route(&ctx.host, &ctx.uri_path, &ctx.method);
    match route {
        Some(ref r) => ctx.route = Some(r.clone() as Arc<dyn RouteEntry>),
        None => debug!(
            "proxy: no route matched, host={}, uri={}",
            ctx.host, ctx.uri_path
        ),
    }
    route
}

fn phase_on_request(filters: &[Filter], ctx: &mut RequestContext) -> Option<LocalReply> {
    for filter in filters {
        if let FilterResult::Reject(reply) = filter.on_request(ctx) {
            return Some(reply);
        }
    }
    None
}

/// Drain the request body of an admitted request. Only runs after the filters
/// have let the request through, so a rejected client is never waited on.
async fn phase_read_body<B>(
    body: B,
    route: Option<&CompiledRoute>,
    ctx: &mut RequestContext,
) -> Result<(), Response<BoxBody>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    // Nothing answers an unmatched request with its body.
    let Some(route) = route else {
        return Ok(());
    };

    // Reject early if Content-Length already exceeds the limit.
    if let (Some(max), Some(cl)) = (route.max_body_bytes, content_length(ctx)) {
        if cl > max {
            debug!(
                "proxy: request body too large, content_length={}, max={}, route={}",
                cl, max, route.name
            );
            return Err(error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload too large"));
        }
    }

    // Chunked bodies without Content-Length are capped while buffering.
    let collected = match route.max_body_bytes {
        Some(max) => {
            Limited::new(body, usize::try_from(max).unwrap_or(usize::MAX))
                .collect()
                .await
        }
        None => body.collect().await.map_err(Into::into),
    };
    match collected {
        Ok(collected) => {
            ctx.bytes_received = collected.to_bytes().len() as u64;
            Ok(())
        }
        Err(e) if e.is::<LengthLimitError>() => {
            debug!("proxy: buffered body too large, route={}", route.name);
            Err(error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload too large"))
        }
        Err(e) => {
            warn!(
                "proxy: failed to read request body, route={}, error={}",
                route.name, e
            );
            Err(error_response(StatusCode::BAD_REQUEST, "bad request"))
        }
    }
}

fn content_length(ctx: &RequestContext) -> Option<u64> {
    ctx.header(CONTENT_LENGTH.as_str())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn direct_response(route: Option<&CompiledRoute>) -> Response<BoxBody> {
    match route {
        Some(r) => {
            let mut resp = Response::new(full_body(r.direct_response.body.clone()));
            *resp.status_mut() = r.direct_response.status;
            resp
        }
        None => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<BoxBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut resp = Response::new(full_body(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
    resp
}

fn phase_on_response(filters: &[Filter], ctx: &RequestContext, resp: &mut Response<BoxBody>) {
    for filter in filters.iter().rev() {
        filter.on_response(ctx, resp);
    }
}

fn phase_log(ctx: &RequestContext, resp: &Response<BoxBody>) {
    let resp_status = resp.status().as_u16();
    let mut buf = itoa::Buffer::new();
    let status_str = buf.format(resp_status);

    metrics::counter!(
        "gateway_http_requests_total",
        "route" => ctx.route_name().to_owned(),
        "method" => ctx.method.clone(),
        "status_code" => status_str.to_owned(),
    )
    .increment(1);

    metrics::histogram!(
        "gateway_http_request_duration_seconds",
        "route" => ctx.route_name().to_owned(),
    )
    .record(ctx.start.elapsed().as_secs_f64());

    // Structured access log, one line per request at info level.
    tracing::info!(
        client_ip = %ctx.client_ip,
        method = %ctx.method,
        host = %ctx.host,
        path = %ctx.uri_path,
        status = resp_status,
        bytes_received = ctx.bytes_received,
        route = %ctx.route_name(),
        rate_limited = ctx.rate_limit_decision.is_some_and(|d| !d.allowed),
        latency_ms = %ctx.start.elapsed().as_millis(),
        "access"
    );
}
