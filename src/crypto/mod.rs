pub mod keys;
pub mod page;
