// ── Sandbox Engine ─────────────────────────────────────────────────────────
// Container-isolated code execution: the language catalog, input hygiene,
// the shared Docker connection, one-shot runs, interactive TTY sessions,
// and the PTY output transform.

pub mod docker;
pub mod languages;
pub mod normalize;
pub mod runner;
pub mod stream;
pub mod terminal;
