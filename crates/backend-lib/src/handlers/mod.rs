// ============================
// relay-backend/src/handlers/mod.rs
// ============================
//! HTTP handlers.
pub mod meeting;
