//! # llm-proxy
//!
//! A transparent, token-authenticated reverse proxy for LLM backends.
//!
//! ## Request pipeline
//!
//! ```text
//! client
//!   -> extract bearer token           (proxy::auth)
//!   -> validate + cache               (token::validator, token::cache)
//!   -> project admission check        (project::active_cache)
//!   -> rate limit                     (ratelimit)
//!   -> circuit breaker gate           (circuit)
//!   -> cache lookup (idempotent only) (httpcache)
//!   -> dispatch to upstream           (proxy::upstream)
//!   -> cache + usage accounting       (httpcache, proxy::usage)
//!   -> emit event                     (events)
//! ```
//!
//! Each stage above is a module with a narrow, independently testable
//! contract; `proxy::pipeline` is the only place that sequences all of
//! them.

pub mod circuit;
pub mod config;
pub mod error;
pub mod events;
pub mod httpcache;
pub mod project;
pub mod proxy;
pub mod ratelimit;
pub mod server;
pub mod token;

pub use error::{ProxyError, Result};
