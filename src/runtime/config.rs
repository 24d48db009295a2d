//! Execution limits for the runtime.

/// Resource limits for running adapted bodies.
///
/// When a limit is reached execution stops with [`crate::Error::LimitExceeded`]. A limit
/// of 0 disables the check.
///
/// ```rust
/// use dotreflect::ExecutionLimits;
///
/// let limits = ExecutionLimits::new()
///     .with_max_instructions(50_000)
///     .with_max_call_depth(64);
/// assert_eq!(limits.max_heap_objects, 100_000);
/// ```
///
/// # Default Values
///
/// | Limit | Default Value |
/// |-------|---------------|
/// | `max_instructions` | 10,000,000 |
/// | `max_call_depth` | 1,000 |
/// | `max_stack_depth` | 1,024 |
/// | `max_heap_objects` | 100,000 |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Maximum instructions executed over the lifetime of a runtime.
    pub max_instructions: u64,

    /// Maximum nesting of calls.
    pub max_call_depth: usize,

    /// Maximum evaluation stack depth of a single frame.
    pub max_stack_depth: usize,

    /// Maximum number of heap objects.
    pub max_heap_objects: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        ExecutionLimits {
            max_instructions: 10_000_000,
            max_call_depth: 1_000,
            max_stack_depth: 1_024,
            max_heap_objects: 100_000,
        }
    }
}

impl ExecutionLimits {
    /// Creates the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// No limits at all.
    #[must_use]
    pub fn unlimited() -> Self {
        ExecutionLimits {
            max_instructions: 0,
            max_call_depth: 0,
            max_stack_depth: 0,
            max_heap_objects: 0,
        }
    }

    /// Sets the maximum number of executed instructions.
    ///
    /// # Arguments
    ///
    /// * `max` - Instruction budget, 0 for unlimited
    ///
    /// # Returns
    ///
    /// The updated limits.
    #[must_use]
    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = max;
        self
    }

    /// Sets the maximum call depth.
    #[must_use]
    pub fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }

    /// Sets the maximum evaluation stack depth.
    #[must_use]
    pub fn with_max_stack_depth(mut self, max: usize) -> Self {
        self.max_stack_depth = max;
        self
    }

    /// Sets the maximum number of heap objects.
    #[must_use]
    pub fn with_max_heap_objects(mut self, max: usize) -> Self {
        self.max_heap_objects = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders() {
        let limits = ExecutionLimits::new()
            .with_max_instructions(10)
            .with_max_call_depth(2)
            .with_max_stack_depth(3)
            .with_max_heap_objects(4);

        assert_eq!(limits.max_instructions, 10);
        assert_eq!(limits.max_call_depth, 2);
        assert_eq!(limits.max_stack_depth, 3);
        assert_eq!(limits.max_heap_objects, 4);
        assert_eq!(ExecutionLimits::unlimited().max_instructions, 0);
    }
}
