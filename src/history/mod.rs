pub mod store;
pub mod transcript;
pub mod types;
