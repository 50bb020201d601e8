pub mod mirror;
pub mod version;
