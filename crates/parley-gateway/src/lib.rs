//! Live channel: presence, event fan-out and status acknowledgements.

pub mod connection;
pub mod dispatcher;
pub mod presence;
pub mod status;
