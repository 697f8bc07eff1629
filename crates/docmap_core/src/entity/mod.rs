//! Entity behaviour: change tracking, document and embedded operations.
//!
//! Entities are addressed by [`EntityRef`](crate::EntityRef) and all of
//! their operations are methods on [`Session`](crate::Session), split over
//! the modules below by concern.

mod debug;
mod document;
mod embedded;
mod id;
mod reference;
mod state;
mod tracker;

pub use id::{generator_by_name, IdGenerator, SequenceGenerator, UuidGenerator};
pub(crate) use state::EntityState;
