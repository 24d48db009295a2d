//! # dotreflect Prelude
//!
//! Re-exports the types needed to describe methods, adapt them to delegate shapes and
//! invoke the result.
//!
//! ```rust
//! use dotreflect::prelude::*;
//!
//! let registry = TypeRegistry::new();
//! let shape = DelegateSignature::new(&registry.void(), Vec::new());
//! assert_eq!(shape.arity(), 0);
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotreflect operations
pub use crate::Error;

/// The result type used throughout dotreflect
pub use crate::Result;

// ================================================================================================
// Metadata
// ================================================================================================

/// Type descriptors and the registry of well-known types
pub use crate::metadata::{
    registry::TypeRegistry,
    token::Token,
    typesystem::{CilFlavor, CilType, CilTypeRc},
};

/// Method descriptors
pub use crate::metadata::method::{MethodDesc, MethodRc};

/// Delegate shapes
pub use crate::metadata::signature::{DelegateSignature, SignatureParam, SlotAccess};

// ================================================================================================
// Adaptation
// ================================================================================================

/// Slots, adapter, cache and configuration
pub use crate::adapter::{AdapterConfig, BindingOrder, DelegateCache, MethodAdapter, Slot};

// ================================================================================================
// Emission
// ================================================================================================

/// Body construction
pub use crate::{assembly::OpCode, emit::Emitter, emit::InstructionStream};

// ================================================================================================
// Execution
// ================================================================================================

/// Running adapted delegates
pub use crate::runtime::{AdaptedDelegate, CallContext, EmValue, ExecutionLimits, Runtime};
