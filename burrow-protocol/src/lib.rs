//! Burrow wire protocol
//!
//! Types and helpers shared by every component that speaks the tunnel
//! control protocol: frame definitions, identifier generation, subdomain
//! rules, and the error taxonomy used on the wire and in logs.

pub mod error;
pub mod frame;
pub mod ids;
pub mod subdomain;

pub use error::{Error, Result};
pub use frame::Frame;
pub use ids::new_id;
