//! Route handlers

pub mod assignment;
pub mod experiments;
pub mod health;
