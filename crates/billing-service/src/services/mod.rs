//! Service layer for the billing authority.
//!
//! # Components
//!
//! - `confirmation` - Signs credentials and `call_id:duration:epoch` confirmations
//! - `conferences` - Conference create/join and the SFU lifecycle callbacks
//! - `identifiers` - Random conference, participant and call identifiers

pub mod conferences;
pub mod confirmation;
pub mod identifiers;

pub use conferences::ConferenceService;
pub use confirmation::ConfirmationSigner;
