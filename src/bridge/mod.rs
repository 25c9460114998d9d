pub mod client;
pub mod error;
pub mod pair;
pub mod resource;
