//! Timeout middleware

use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// Create a timeout layer; timed out requests get 408
pub fn create_timeout_layer(duration: Duration) -> TimeoutLayer {
    TimeoutLayer::new(duration)
}

/// Timeout layer from the configured number of seconds
pub fn request_timeout(secs: u64) -> TimeoutLayer {
    create_timeout_layer(Duration::from_secs(secs))
}
