//! Resilience primitives for the transport boundary (spec.md §4.6): a
//! three-state circuit breaker, a token-bucket rate limiter, and a bounded
//! exponential-backoff retry policy.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
