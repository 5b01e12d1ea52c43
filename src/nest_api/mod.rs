pub mod properties;
pub mod tiles;
