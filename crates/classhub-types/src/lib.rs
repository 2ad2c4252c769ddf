//! Wire types shared by the transport and the conversation controller.

pub mod api;
pub mod events;
pub mod models;
