mod auth;
mod pages;
mod storage;

pub use auth::*;
pub use pages::*;
pub use storage::*;
