//! Adapting methods to delegate signatures.
//!
//! This module holds the pieces that decide how a delegate's parameters feed a callee:
//!
//! - [`Slot`] - a value position with an access mode and an origin
//! - [`planner`] - legality, exactness and emission of slot-to-slot conversions
//! - [`MethodAdapter`] - builds one adapted body per (method, signature) pair
//! - [`DelegateCache`] - thread-safe memoization and batch adaptation
//! - [`AdapterConfig`] - sentinel types and binding order

mod cache;
mod config;
mod method;
pub mod planner;
mod slot;

pub use cache::DelegateCache;
pub use config::{AdapterConfig, BindingOrder, BindingStrategy};
pub use method::MethodAdapter;
pub use planner::{Conversion, ConversionPlan};
pub use slot::{Slot, SlotOrigin};

pub use crate::metadata::signature::SlotAccess;
