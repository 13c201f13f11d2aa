use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http::{Method, StatusCode};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response};
use serde::Serialize;
use url::form_urlencoded;

use crate::discovery::Discovery;

#[derive(Debug, Serialize)]
struct DiscoverResponse<'a> {
    client_ip: IpAddr,
    encoded_server_entries: &'a [String],
}

#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

/// HTTP front for the discovery step.
///
/// `GET /discover` answers for the connecting peer, `GET /discover?client_ip=..`
/// for an explicit address (as forwarded by a handshake front end).
pub struct DiscoveryEndpoint {
    discovery: Arc<Discovery>,
}

impl DiscoveryEndpoint {
    pub fn new(discovery: Arc<Discovery>) -> Self {
        Self { discovery }
    }

    pub async fn serve(&self, bind_address: SocketAddr) -> Result<(), hyper::Error> {
        let discovery = Arc::clone(&self.discovery);

        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_ip = conn.remote_addr().ip();
            let discovery = Arc::clone(&discovery);

            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let discovery = Arc::clone(&discovery);
                    async move { Ok::<_, Infallible>(handle(&discovery, &req, remote_ip)) }
                }))
            }
        });

        let server = hyper::Server::try_bind(&bind_address)?.serve(make_svc);
        tracing::info!(address = %server.local_addr(), "discovery endpoint listening");
        server.await
    }
}

fn handle(discovery: &Discovery, req: &Request<Body>, remote_ip: IpAddr) -> Response<Body> {
    if req.method() != Method::GET {
        return response_with_status(StatusCode::METHOD_NOT_ALLOWED, "Only GET is supported");
    }
    if req.uri().path() != "/discover" {
        return response_with_status(StatusCode::NOT_FOUND, "Unknown path");
    }

    let client_ip = match query_client_ip(req.uri().query()) {
        Ok(Some(ip)) => ip,
        Ok(None) => remote_ip,
        Err(()) => {
            return response_with_status(StatusCode::BAD_REQUEST, "Invalid client_ip");
        }
    };

    let entries = discovery.discover_servers(client_ip);
    tracing::debug!(%client_ip, disclosed = entries.len(), "discovery request");

    let body = DiscoverResponse {
        client_ip,
        encoded_server_entries: &entries,
    };
    json_response(StatusCode::OK, &body)
}

/// `Ok(None)` when the query carries no `client_ip`.
fn query_client_ip(query: Option<&str>) -> Result<Option<IpAddr>, ()> {
    let Some(query) = query else {
        return Ok(None);
    };
    match form_urlencoded::parse(query.as_bytes()).find(|(key, _)| key == "client_ip") {
        Some((_, value)) => value.parse().map(Some).map_err(|_| ()),
        None => Ok(None),
    }
}

fn response_with_status(status: StatusCode, msg: &str) -> Response<Body> {
    json_response(status, &ErrorResponse { error: msg })
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let json = match serde_json::to_vec(body) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode discovery response");
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default();
        }
    };
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(json))
        .unwrap_or_default()
}
