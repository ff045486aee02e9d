//! Request rate limiting and security event tracking

pub mod rate_limiter;
pub mod service;

pub use rate_limiter::{LimitInfo, RateLimitConfig, RateLimitResult, RateLimitStrategy, RateLimiter};
pub use service::{SecurityEvent, SecurityService, SecuritySeverity, SecurityStats};
