//! Executing adapted delegates.
//!
//! # Key Components
//!
//! - [`EmValue`] - values on the evaluation stack, in frames and on the heap
//! - [`ManagedHeap`] - strings, arrays, class instances and boxed values
//! - [`Runtime`] - the interpreter that runs generated bodies and native methods
//! - [`CallContext`] - what a native method sees of the runtime
//! - [`AdaptedDelegate`] - a generated body bound to its method and signature
//! - [`ExecutionLimits`] - instruction, call depth, stack and heap budgets
//!
//! # Examples
//!
//! ```rust
//! use dotreflect::prelude::*;
//!
//! let registry = TypeRegistry::new();
//! let mut runtime = Runtime::with_registry(registry.clone())
//!     .with_limits(ExecutionLimits::new().with_max_instructions(1_000));
//!
//! let boxed = runtime.box_value(&registry.int32(), EmValue::I32(7))?;
//! assert_eq!(runtime.render(&boxed), "7");
//! # Ok::<(), dotreflect::Error>(())
//! ```

mod config;
mod delegate;
mod heap;
mod interpreter;
mod value;

pub use config::ExecutionLimits;
pub use delegate::AdaptedDelegate;
pub use heap::{HeapObject, ManagedHeap};
pub use interpreter::{CallContext, Runtime};
pub use value::{EmValue, HeapRef, ManagedPointer, PointerTarget, StructValue};
