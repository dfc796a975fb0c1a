//! Client-side mirror of a direct-message conversation.
//!
//! [`store::ChatStore`] keeps the selected conversation in sync with the
//! server: history comes from the REST API ([`api::ChatApi`]), live changes
//! arrive through a [`socket::LiveSocket`]. Reactions and statuses are folded
//! in with the same rules the server uses, so both sides converge.

pub mod api;
pub mod error;
pub mod socket;
pub mod store;
