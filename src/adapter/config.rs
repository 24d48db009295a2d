//! Adapter configuration.

use strum::{Display, EnumIter};

use crate::metadata::typesystem::CilType;

/// How callee parameters are supplied from the delegate parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum BindingStrategy {
    /// One delegate parameter per callee parameter, left to right
    #[strum(serialize = "positional")]
    Positional,
    /// Every callee parameter is an element of a single trailing `object[]`
    #[strum(serialize = "params")]
    Params,
}

/// Which binding strategy is attempted first when both fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingOrder {
    /// Positional binding, then `params` binding
    #[default]
    PositionalFirst,
    /// `params` binding, then positional binding
    ParamsFirst,
}

impl BindingOrder {
    /// The strategies in the order they are attempted.
    #[must_use]
    pub fn strategies(self) -> [BindingStrategy; 2] {
        match self {
            BindingOrder::PositionalFirst => [BindingStrategy::Positional, BindingStrategy::Params],
            BindingOrder::ParamsFirst => [BindingStrategy::Params, BindingStrategy::Positional],
        }
    }
}

/// Configuration of a [`crate::MethodAdapter`].
///
/// # Default Values
///
/// | Setting | Default Value |
/// |---------|---------------|
/// | `sentinel_types` | `System.Object` |
/// | `binding_order` | [`BindingOrder::PositionalFirst`] |
///
/// ```rust
/// use dotreflect::{AdapterConfig, BindingOrder};
///
/// let config = AdapterConfig::default()
///     .with_sentinel_type("Demo.Unused")
///     .with_binding_order(BindingOrder::ParamsFirst);
/// assert_eq!(config.sentinel_types.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Full names of types whose leading delegate parameter a static method may ignore.
    ///
    /// Delegates built for instance and static methods alike often carry a receiver
    /// parameter; when a static method is adapted and that parameter has one of these
    /// types, binding is also attempted with it skipped.
    pub sentinel_types: Vec<String>,

    /// Strategy order when both positional and `params` binding fit.
    pub binding_order: BindingOrder,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            sentinel_types: vec!["System.Object".to_string()],
            binding_order: BindingOrder::default(),
        }
    }
}

impl AdapterConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sentinel type by full name.
    #[must_use]
    pub fn with_sentinel_type(mut self, full_name: impl Into<String>) -> Self {
        self.sentinel_types.push(full_name.into());
        self
    }

    /// Replaces the sentinel types.
    #[must_use]
    pub fn with_sentinel_types<I, S>(mut self, full_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sentinel_types = full_names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the binding order.
    #[must_use]
    pub fn with_binding_order(mut self, order: BindingOrder) -> Self {
        self.binding_order = order;
        self
    }

    /// Returns `true` if `ty` is a sentinel type.
    #[must_use]
    pub fn is_sentinel(&self, ty: &CilType) -> bool {
        let name = ty.full_name();
        self.sentinel_types.iter().any(|sentinel| *sentinel == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::registry::TypeRegistry;

    #[test]
    fn defaults() {
        let registry = TypeRegistry::new();
        let config = AdapterConfig::default();

        assert!(config.is_sentinel(&registry.object()));
        assert!(!config.is_sentinel(&registry.int32()));
        assert_eq!(
            config.binding_order.strategies(),
            [BindingStrategy::Positional, BindingStrategy::Params]
        );
    }

    #[test]
    fn builders() {
        let registry = TypeRegistry::new();
        let config = AdapterConfig::new()
            .with_sentinel_types(["System.String"])
            .with_binding_order(BindingOrder::ParamsFirst);

        assert!(config.is_sentinel(&registry.string()));
        assert!(!config.is_sentinel(&registry.object()));
        assert_eq!(config.binding_order.strategies()[0], BindingStrategy::Params);
        assert_eq!(BindingStrategy::Params.to_string(), "params");
    }
}
