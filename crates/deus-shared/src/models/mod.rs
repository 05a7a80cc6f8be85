mod page;
mod pin;
mod role;
mod user;

pub use page::*;
pub use pin::*;
pub use role::*;
pub use user::*;
