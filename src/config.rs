/// Knobs for one run of the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Routine nesting deeper than this is a fatal error.
    pub max_call_depth: usize,
    /// Call `Module main()` after the top-level statements, if it exists.
    pub auto_main: bool,
    /// Largest number of elements one array declaration may allocate.
    pub max_array_elements: usize,
}

impl EngineConfig {
    pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;
    pub const DEFAULT_MAX_ARRAY_ELEMENTS: usize = 1 << 24;

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_auto_main(mut self, enabled: bool) -> Self {
        self.auto_main = enabled;
        self
    }

    pub fn with_max_array_elements(mut self, limit: usize) -> Self {
        self.max_array_elements = limit;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: Self::DEFAULT_MAX_CALL_DEPTH,
            auto_main: true,
            max_array_elements: Self::DEFAULT_MAX_ARRAY_ELEMENTS,
        }
    }
}
