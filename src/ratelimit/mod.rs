//! Rate limiting logic and state management.

mod limiter;
mod window;

pub use limiter::{
    RateLimitInfo, RateLimiter, RateLimiterConfig, DEFAULT_MAX_REQUESTS, DEFAULT_SWEEP_INTERVAL,
    DEFAULT_WINDOW,
};
pub use window::WindowCounter;
