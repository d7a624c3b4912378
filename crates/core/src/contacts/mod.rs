//! Emergency contacts: models, merge rules, and the durable local store.

mod contacts_merge;
mod contacts_model;
mod contacts_traits;
mod local_store;

pub use contacts_merge::*;
pub use contacts_model::*;
pub use contacts_traits::*;
pub use local_store::*;
