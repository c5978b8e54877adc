//! API handlers module

pub mod ask;
pub mod cache;
pub mod health;
