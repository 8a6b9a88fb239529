use super::GatewayState;
use crate::proxy::context::{full_body, BoxBody};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

pub fn handle_admin(
    req: Request<Incoming>,
    state: GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    Ok(admin_response(req.uri().path(), &state))
}

fn admin_response(path: &str, state: &GatewayState) -> Response<BoxBody> {
    match path {
        "/health" | "/healthz" => json(StatusCode::OK, r#"{"status":"ok"}"#.to_string()),

        "/metrics" => {
            let mut resp = Response::new(full_body(state.metrics.render()));
            resp.headers_mut().insert(
                "content-type",
                http::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            resp
        }

        "/config" => {
            let body = serde_json::to_string_pretty(state.config.as_ref()).unwrap_or_default();
            json(StatusCode::OK, body)
        }

        _ => json(StatusCode::NOT_FOUND, r#"{"error":"not found"}"#.to_string()),
    }
}

fn json(status: StatusCode, body: String) -> Response<BoxBody> {
    let mut resp = Response::new(full_body(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert("content-type", http::HeaderValue::from_static("application/json"));
    resp
}
