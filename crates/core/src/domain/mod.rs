pub mod slot;
pub mod user;
