#![doc = include_str!("../README.md")]

pub mod coordinator;
mod error;
mod rand;
pub mod segment;
mod service;
pub mod snowflake;
mod status;
pub mod store;
mod time;

pub use crate::error::*;
pub use crate::rand::*;
pub use crate::service::*;
pub use crate::status::*;
pub use crate::time::*;
