use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Messages requested per page load.
    pub page_size: usize,
    /// Typists not refreshed within this window are dropped.
    pub typing_quiet: Duration,
    /// Idle time after the last keystroke before `typing:stop` is emitted.
    pub typing_stop_delay: Duration,
    /// Minimum spacing of repeated `typing:start` while typing continues.
    pub typing_refresh: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            typing_quiet: Duration::from_secs(6),
            typing_stop_delay: Duration::from_secs(1),
            typing_refresh: Duration::from_secs(3),
        }
    }
}
