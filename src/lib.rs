// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # dotreflect
//!
//! Runtime method adaptation for .NET, in pure Rust. `dotreflect` takes an arbitrary
//! method description (static or instance, by-value, `ref`/`in`/`out`, `params object[]`,
//! boxed `object` parameters) and a target delegate shape, plans every argument
//! conversion, emits a CIL delegate body that marshals the arguments and calls the
//! method, and materializes that body into an invocable delegate.
//!
//! ## Features
//!
//! - **Conversion planning** - a total decision procedure over source/destination slots
//!   with an exactness score for ranking candidate overloads
//! - **CIL emission** - opcode-table driven encoder with label fixups, stack tracking and
//!   checkpoint/rollback for speculative emission
//! - **Instruction stream** - an inspectable log of everything emitted, with offset lookup,
//!   truncation and listings
//! - **Execution** - a small CIL interpreter with a managed heap that runs adapted bodies
//! - **Caching** - concurrent memoization of adapted delegates
//!
//! ## Quick Start
//!
//! ```rust
//! use dotreflect::prelude::*;
//!
//! let registry = TypeRegistry::new();
//! let int32 = registry.int32();
//! let math = CilType::class("Demo", "Math").extends(&registry.object()).build();
//!
//! let add = MethodDesc::builder("Add", &math)
//!     .static_method()
//!     .param("a", &int32)
//!     .param("b", &int32)
//!     .returns(&int32)
//!     .native(|_, args| {
//!         let (a, b) = (args[0].as_i32()?, args[1].as_i32()?);
//!         Ok(Some(EmValue::I32(a + b)))
//!     })
//!     .build();
//!
//! let shape = DelegateSignature::new(&int32, vec![SignatureParam::value(&int32); 2]);
//! let delegate = MethodAdapter::new(&registry).adapt(&add, &shape)?;
//!
//! let mut runtime = Runtime::new();
//! let result = delegate.invoke(&mut runtime, &mut [EmValue::I32(2), EmValue::I32(3)])?;
//! assert_eq!(result, Some(EmValue::I32(5)));
//! # Ok::<(), dotreflect::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - tokens, the type system, method descriptors and delegate signatures
//! - [`assembly`] - the CIL opcode table, encoder and decoder
//! - [`emit`] - the instruction stream and the emitter built on the encoder
//! - [`adapter`] - slots, the conversion planner, the method adapter and the delegate cache
//! - [`runtime`] - the value model, managed heap and interpreter used to invoke delegates
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Adaptation failures are reported as
//! [`Error::AdaptationFailed`] wrapping the precise cause:
//!
//! ```rust,no_run
//! use dotreflect::Error;
//!
//! fn report(err: &Error) {
//!     match err {
//!         Error::AdaptationFailed { method, signature, source } => {
//!             eprintln!("cannot adapt {method} to {signature}: {source}");
//!         }
//!         other => eprintln!("{other}"),
//!     }
//! }
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

/// Tokens, type system, method descriptors and delegate signatures.
pub mod metadata;

/// CIL opcode table, instruction encoding and decoding.
///
/// The [`assembly::InstructionEncoder`] is the code buffer every adapter drives, the
/// decoder validates finalized bodies and feeds the interpreter.
pub mod assembly;

/// The instruction stream and the emitter used to build method bodies.
pub mod emit;

/// Slots, the conversion planner, the method adapter and the delegate cache.
pub mod adapter;

/// Value model, managed heap and interpreter for invoking adapted delegates.
pub mod runtime;

pub use adapter::{
    AdapterConfig, BindingOrder, ConversionPlan, DelegateCache, MethodAdapter, Slot, SlotAccess,
};
pub use assembly::{InstructionEncoder, OpCode, Parser};
pub use emit::{Emitter, InstructionStream};
pub use error::Error;
pub use metadata::{
    method::{MethodDesc, MethodRc},
    signature::{DelegateSignature, SignatureParam},
    token::Token,
    typesystem::{CilFlavor, CilType, CilTypeRc},
    TypeRegistry,
};
pub use runtime::{AdaptedDelegate, EmValue, ExecutionLimits, Runtime};

/// `dotreflect` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
