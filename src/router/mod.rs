//! Request routing: every outgoing request is classified, then served by the
//! strategy for its class (network-first, cache-first, navigation fallback).
//!
//! The router is a pure dispatch table over the response cache; the worker
//! shell (CLI or embedding app) is a thin adapter that hands it requests and
//! a fetcher closure, so the strategies are testable without a network.

mod classify;
mod serve;

pub use classify::{classify, RequestClass, RoutePolicy};
pub use serve::Router;
