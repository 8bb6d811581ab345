pub mod rate_limit;
pub mod security_headers;
pub mod tracing;

pub use rate_limit::{
    ClientIpRateLimiter, client_ip_rate_limit_middleware, create_client_ip_rate_limiter,
};
pub use security_headers::security_headers_middleware;
pub use tracing::{REQUEST_ID_HEADER, request_id_middleware};
