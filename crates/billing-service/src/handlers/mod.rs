//! HTTP request handlers for the billing service.

pub mod callbacks;
pub mod health;
pub mod participants;

pub use callbacks::{add_participant, remove_conference, remove_participant};
pub use health::health_check;
pub use participants::{create_conference, join_conference, list_participants};
