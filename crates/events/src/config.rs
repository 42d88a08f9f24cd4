//! Bus configuration, frozen by [`crate::Bus::start`].

use serde::{Deserialize, Serialize};

use nodebus_core::{BusError, BusResult, LogLevel};

/// Smallest legal `id_maximum_logging_length`.
pub const MINIMUM_ID_LOGGING_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Events below this level are not logged.
    pub log_level: LogLevel,
    /// Append parameter names and values to each dispatch line.
    pub log_event_parameters: bool,
    /// Include expected/actual type names next to typed parameters.
    pub log_parameter_type_info: bool,
    /// Column width for node and event ids; longer ids are truncated.
    pub id_maximum_logging_length: usize,
    /// Undo stack bound; negative means unbounded.
    pub maximum_undo_events: i64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_event_parameters: true,
            log_parameter_type_info: false,
            id_maximum_logging_length: 40,
            maximum_undo_events: 1000,
        }
    }
}

impl BusConfig {
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_event_parameters(mut self, enabled: bool) -> Self {
        self.log_event_parameters = enabled;
        self
    }

    pub fn with_parameter_type_info(mut self, enabled: bool) -> Self {
        self.log_parameter_type_info = enabled;
        self
    }

    pub fn with_id_maximum_logging_length(mut self, length: usize) -> Self {
        self.id_maximum_logging_length = length;
        self
    }

    pub fn with_maximum_undo_events(mut self, max: i64) -> Self {
        self.maximum_undo_events = max;
        self
    }

    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json(json: &str) -> BusResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BusError::invalid_configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BusResult<()> {
        if self.id_maximum_logging_length < MINIMUM_ID_LOGGING_LENGTH {
            return Err(BusError::invalid_configuration(format!(
                "'id_maximum_logging_length' has to be greater or equal to {MINIMUM_ID_LOGGING_LENGTH}"
            )));
        }
        Ok(())
    }
}
