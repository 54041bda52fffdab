//! Built-in middleware stages.
//!
//! - [`request_id`]: assign or propagate a request ID and echo it back
//! - [`access_log`]: structured request and outcome events
//!
//! Both can be named from a deployment file as `egg:trellis#request_id` and
//! `egg:trellis#access_log`.

pub mod access_log;
pub mod request_id;

pub use access_log::AccessLogMiddleware;
pub use request_id::RequestIdMiddleware;
