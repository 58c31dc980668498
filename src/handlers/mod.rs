//! HTTP request handlers.

pub mod guard;
pub mod health;
pub mod members;
pub mod modules;
pub mod permissions;
pub mod roles;
pub mod users;
