mod normalize;
mod repository;
mod schema;

pub use repository::{Repository, StoreCounts};
