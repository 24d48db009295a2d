//! Metadata model for method adaptation.
//!
//! Everything the adapter needs to know about the code it binds to arrives through this
//! module, already resolved: types, methods and the delegate shapes to adapt them to.
//!
//! # Key Components
//!
//! - [`token`] - identity tokens for types, methods and body-local references
//! - [`typesystem`] - [`CilType`](typesystem::CilType) descriptors and assignability
//! - [`registry`] - [`TypeRegistry`], the injected lookup for well-known types
//! - [`method`] - [`MethodDesc`](method::MethodDesc) with parameters, attributes and body
//! - [`signature`] - [`DelegateSignature`](signature::DelegateSignature) target shapes
//!
//! # Examples
//!
//! ```rust
//! use dotreflect::prelude::*;
//!
//! let registry = TypeRegistry::new();
//! let counter = CilType::value_type("Demo", "Counter")
//!     .extends(&registry.value_type())
//!     .field("Value", &registry.int32())
//!     .build();
//!
//! let increment = MethodDesc::builder("Increment", &counter).build();
//! let shape = DelegateSignature::of_method(&increment);
//! assert_eq!(shape.to_string(), "(ref Demo.Counter)->System.Void");
//! ```

/// Method descriptors and their builder
pub mod method;
/// The registry of well-known types
pub mod registry;
/// Delegate signatures and access modes
pub mod signature;
/// Identity tokens
pub mod token;
/// Type descriptors
pub mod typesystem;

pub use registry::TypeRegistry;
