//! Runtime configuration.

/// Settings of one [`Runtime`](crate::Runtime) instance.
///
/// ```
/// use spark_process::RuntimeConfig;
///
/// let config = RuntimeConfig::default()
///     .with_source_thread_prefix("ui-source")
///     .with_warn_on_cycles(false);
/// assert_eq!(config.source_thread_prefix, "ui-source");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Name prefix of timed-source worker threads.
    pub source_thread_prefix: String,
    /// Prefix of generated names for nodes created without one.
    pub anonymous_prefix: String,
    /// Log vertices that sit on a dependency cycle when the order is rebuilt.
    pub warn_on_cycles: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            source_thread_prefix: "spark-source".to_string(),
            anonymous_prefix: "anonymous_".to_string(),
            warn_on_cycles: true,
        }
    }
}

impl RuntimeConfig {
    pub fn with_source_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source_thread_prefix = prefix.into();
        self
    }

    pub fn with_anonymous_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.anonymous_prefix = prefix.into();
        self
    }

    pub fn with_warn_on_cycles(mut self, warn: bool) -> Self {
        self.warn_on_cycles = warn;
        self
    }
}
