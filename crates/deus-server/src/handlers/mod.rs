pub mod auth;
pub mod pages;
pub mod pins;
pub mod storage;
