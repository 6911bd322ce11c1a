// =============================================================================
// Observability API — axum HTTP + WS surface over the engine's live state
// =============================================================================
//
// Grounded on `api/rest.rs`'s router-construction shape (routes mounted
// under `/api/v1/`, CORS layered on top, state shared via `.with_state`).
// There is no authenticated surface here: this core exposes no private
// data and accepts no control commands, so the Bearer-token extractor the
// teacher gated every route behind is dropped entirely.
// =============================================================================

pub mod rest;
pub mod ws;

pub use rest::router;
