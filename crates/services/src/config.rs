use std::env;
use std::time::Duration;

pub const DEFAULT_AUTOSAVE_DEBOUNCE: Duration = Duration::from_secs(3);
pub const DEFAULT_HELP_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_HELP_MESSAGE_MAX: usize = 2000;

/// Timing and limits shared by the autosave, help and help-queue services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Edits inside one window collapse into a single write.
    pub autosave_debounce: Duration,
    pub help_poll_interval: Duration,
    /// Maximum help message length in characters, after trimming.
    pub max_help_message_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave_debounce: DEFAULT_AUTOSAVE_DEBOUNCE,
            help_poll_interval: DEFAULT_HELP_POLL_INTERVAL,
            max_help_message_len: DEFAULT_HELP_MESSAGE_MAX,
        }
    }
}

impl EngineConfig {
    /// Read overrides from `CLASSROOM_AUTOSAVE_DEBOUNCE_MS`,
    /// `CLASSROOM_HELP_POLL_SECS` and `CLASSROOM_HELP_MESSAGE_MAX`.
    ///
    /// Unset or unparseable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`] with a custom variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |name: &str| -> Option<u64> {
            let raw = lookup(name)?;
            match raw.trim().parse::<u64>() {
                Ok(value) if value > 0 => Some(value),
                _ => {
                    tracing::warn!(variable = name, value = %raw, "ignoring invalid setting");
                    None
                }
            }
        };

        Self {
            autosave_debounce: read("CLASSROOM_AUTOSAVE_DEBOUNCE_MS")
                .map_or(defaults.autosave_debounce, Duration::from_millis),
            help_poll_interval: read("CLASSROOM_HELP_POLL_SECS")
                .map_or(defaults.help_poll_interval, Duration::from_secs),
            max_help_message_len: read("CLASSROOM_HELP_MESSAGE_MAX")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.max_help_message_len),
        }
    }
}
