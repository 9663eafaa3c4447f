use std::time::Duration;

/// Controls dispatcher shutdown behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// When true, the pump loop waits for in-flight scheduled handlers
    /// before reporting termination.
    pub drain_on_close: bool,
    /// Upper bound on that wait.
    pub drain_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            drain_on_close: true,
            drain_timeout: Duration::from_secs(5),
        }
    }
}
