// ── Engine ─────────────────────────────────────────────────────────────────
// Everything behind the transport layer: configuration, the AI gateway with
// its resilience stack, the provider implementations, the Docker sandbox,
// and the metadata store.

pub mod config;
pub mod gateway;
pub mod providers;
pub mod sandbox;
pub mod store;
