//! The overlay is an external collaborator: this module contains only the boundary that the
//!  request / reply layer consumes from it.

pub mod address;
pub mod overlay;
pub mod overlay_events;
pub mod packet;
pub mod protocol_id;
