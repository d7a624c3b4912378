//! String key-value persistence backing the local contact store.

mod model;
mod repository;

pub use model::KeyValueEntryDB;
pub use repository::KeyValueRepository;
