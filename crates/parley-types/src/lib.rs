//! Shared model, wire types and the pure state-transition rules used by both
//! the server and the client mirror.

pub mod api;
pub mod events;
pub mod models;
pub mod reactions;
pub mod status;
