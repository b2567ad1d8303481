pub mod models;
pub mod predict;

pub use models::*;
pub use predict::*;
