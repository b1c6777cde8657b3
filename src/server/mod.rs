//! HTTP transport on `may_minihttp`.

mod http_server;
pub mod request;
pub mod response;
mod service;

pub use http_server::{HttpServer, ServerHandle, MAX_REQUEST_HEADERS};
pub use request::{
    parse_query_params, split_invoke_path, HeaderVec, InboundRequest, RequestHead,
    INVOKE_PREFIX,
};
pub use response::{write_response, ResponseSnapshot, ResponseWriter, WriteError};
pub use service::{health_endpoint, metrics_endpoint, AppService, CALLS_PREFIX};
