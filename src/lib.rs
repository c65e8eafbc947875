#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod config;
pub mod crc;
pub mod error;
pub mod image;
pub mod platform;
mod registry;
pub mod sdo;
pub mod storage;
pub mod system;
pub mod table;
pub mod unit;

pub use config::Config;
pub use error::Error;
pub use registry::{Descriptor, Load, Registry};

extern crate alloc;
