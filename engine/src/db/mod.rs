//! Persistence layer: the resource store and its transaction context.

mod store;
mod traits;
mod tx;

pub use store::PgResourceStore;
pub use traits::ResourceStore;
pub use tx::StoreTransaction;

pub(crate) use store::row_to_resource;
