//! # modkit-http — the HTTP collaborator (§6.2)
//!
//! `modkit` itself never depends on HTTP types: the specification treats
//! "the HTTP listener and request/response wrappers" as an external
//! collaborator whose interface, not implementation, is specified. This
//! crate is that collaborator — an `axum` listener that turns each inbound
//! request into a [`modkit::Context`] via [`modkit::Runtime::handle_request_with`],
//! seeding the context's scratch `data` map with an [`HttpRequest`] and an
//! [`HttpResponse`] handle so any action in the resulting plan can read the
//! request and write the response, without `Context` knowing either type.
//!
//! Grounded on the teacher's `contracts.rs` REST traits and its
//! `axum::Router` wiring in the host runtime, generalized into the explicit
//! request/response wrapper types the specification names.

pub mod request;
pub mod response;
pub mod router;
pub mod status;

pub use request::HttpRequest;
pub use response::{HttpResponse, ResponseBody};
pub use router::RewriteTable;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use modkit::Runtime;
use tracing::{error, instrument};

/// Key under which the inbound [`HttpRequest`] is stashed in `Context::data`.
pub const REQUEST_DATA_KEY: &str = "http.request";
/// Key under which the shared [`HttpResponse`] handle is stashed.
pub const RESPONSE_DATA_KEY: &str = "http.response";

#[derive(Clone)]
struct ListenerState {
    runtime: Runtime,
    router: RewriteTable,
    timeout: std::time::Duration,
}

#[derive(Clone, Default)]
struct UuidRequestId;

impl tower_http::request_id::MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<tower_http::request_id::RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        http::HeaderValue::from_str(&id)
            .ok()
            .map(tower_http::request_id::RequestId::new)
    }
}

/// Builds the `axum::Router` that dispatches every request through the
/// triad. `runtime` must already have had [`modkit::install_all`] and
/// [`Runtime::start`] run against it. Every request gets an `x-request-id`
/// header, generated if the client didn't supply one.
pub fn build_router(runtime: Runtime, rewrites: RewriteTable, timeout: std::time::Duration) -> axum::Router {
    let state = ListenerState {
        runtime,
        router: rewrites,
        timeout,
    };
    axum::Router::new()
        .fallback(handle)
        .layer(tower_http::request_id::SetRequestIdLayer::x_request_id(
            UuidRequestId,
        ))
        .layer(tower_http::request_id::PropagateRequestIdLayer::x_request_id())
        .with_state(Arc::new(state))
}

#[instrument(skip(state, req), fields(method = %req.method(), path = %req.uri().path()))]
async fn handle(State(state): State<Arc<ListenerState>>, req: Request<Body>) -> Response<Body> {
    let method = req.method().as_str().to_string();
    let original_path = req.uri().path().to_string();
    let path = state.router.rewrite(&original_path).into_owned();
    let headers = req.headers().clone();

    let body_bytes = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(%err, "failed to buffer request body");
            return text_response(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };

    let http_request = HttpRequest {
        method: req_method(&method),
        uri: path.parse().unwrap_or_else(|_| "/".parse().unwrap()),
        headers,
        body: body_bytes,
    };
    let http_response = HttpResponse::new();

    let seed_request = http_request.clone();
    let seed_response = http_response.clone();
    let ctx = state
        .runtime
        .handle_request_with(&method, &path, state.timeout, move |ctx| {
            ctx.set_data(REQUEST_DATA_KEY, Arc::new(seed_request) as Arc<dyn std::any::Any + Send + Sync>);
            ctx.set_data(RESPONSE_DATA_KEY, Arc::new(seed_response) as Arc<dyn std::any::Any + Send + Sync>);
        })
        .await;

    if let Some(err) = ctx.error() {
        let code = status::status_for_error(&err);
        return text_response(
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            &err.to_string(),
        );
    }

    response_from(&http_response)
}

fn req_method(method: &str) -> http::Method {
    http::Method::from_bytes(method.to_uppercase().as_bytes()).unwrap_or(http::Method::GET)
}

fn response_from(resp: &HttpResponse) -> Response<Body> {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(resp.status()).unwrap_or(StatusCode::OK),
    );
    for (name, value) in resp.headers() {
        builder = builder.header(name, value);
    }
    for cookie in resp.cookie_headers() {
        builder = builder.header("set-cookie", cookie);
    }
    let body = match resp.body() {
        ResponseBody::Bytes(bytes, _) => Body::from(bytes),
        ResponseBody::Empty => Body::empty(),
    };
    builder
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::from("response build failed")))
}

fn text_response(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use modkit::Action;
    use std::time::Duration;

    #[tokio::test]
    async fn no_matching_route_maps_to_404() {
        let runtime = Runtime::new();
        let router = build_router(runtime, RewriteTable::new(), Duration::from_millis(200));

        let req = Request::builder()
            .uri("/missing")
            .method("GET")
            .body(Body::empty())
            .unwrap();

        let resp = {
            use tower::ServiceExt;
            router.oneshot(req).await.unwrap()
        };
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn matching_action_writes_its_response() {
        let runtime = Runtime::new();
        runtime
            .actions
            .register(
                "/request/:requestId/get/hello",
                Action::new("Greeter", "hello").phase(10),
                true,
            )
            .unwrap();
        runtime
            .bus
            .subscribe(
                "/context/execute/Greeter/hello",
                Arc::new(|msg: modkit::BusMessage| {
                    Box::pin(async move {
                        let ctx = msg.payload.downcast_ref::<modkit::Context>().cloned().unwrap();
                        if let Some(resp) = ctx.get_data(RESPONSE_DATA_KEY) {
                            if let Some(resp) = resp.downcast_ref::<HttpResponse>() {
                                resp.text("hello");
                            }
                        }
                        ctx.action_done("Greeter", "hello");
                        Ok(())
                    })
                }),
            )
            .unwrap();

        let router = build_router(runtime, RewriteTable::new(), Duration::from_millis(200));
        let req = Request::builder()
            .uri("/hello")
            .method("GET")
            .body(Body::empty())
            .unwrap();
        let resp = {
            use tower::ServiceExt;
            router.oneshot(req).await.unwrap()
        };
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello");
    }
}
