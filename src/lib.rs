#![cfg_attr(not(test), no_std)]

pub mod cascade;
pub mod clock;
pub mod config;
pub mod firmware;
pub mod node;
pub mod protocol;
pub mod radio;
pub mod storage;
pub mod sync;

pub use node::{ButtonAction, NodeController, NodeError, NodeRole};
