// codejoin-server — sandboxed code execution and interactive terminals
// behind a resilient multi-provider AI chat gateway.
//
// Layering:
//   atoms/   pure data: constants, the canonical error enum, shared types
//   engine/  the actual machinery: gateway, providers, sandbox, store
//   api/     axum transport: routes, WebSocket terminal, limits, envelope

pub mod api;
pub mod atoms;
pub mod engine;
