pub mod api;
pub mod models;
pub mod slug;
pub mod theme;
pub mod tree;
pub mod validation;

pub use models::*;
