//! Engine configuration.
//!
//! Every field has a default, so a config file only needs the keys it wants
//! to override:
//!
//! ```json
//! { "tickIntervalMs": 500, "modifierChance": 0.0 }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
const DEFAULT_FILLER: &str = "Continue at your own pace.";
const DEFAULT_COMPLETION: &str = "Session complete. Thank you for taking part.";

/// Tunables for the session engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// How often each session timer wakes up.
    pub tick_interval_ms: u64,

    /// Returned when a phase has no instructions.
    pub filler_instruction: String,

    /// Shown by front-ends when a session runs to completion.
    pub completion_message: String,

    /// Probability (0.0..=1.0) of appending a template encouragement.
    pub encouragement_chance: f64,

    /// Probability (0.0..=1.0) of weaving an intensity modifier into the text.
    pub modifier_chance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            filler_instruction: DEFAULT_FILLER.to_string(),
            completion_message: DEFAULT_COMPLETION.to_string(),
            encouragement_chance: 0.3,
            modifier_chance: 0.3,
        }
    }
}

impl EngineConfig {
    /// Load a config from a JSON file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// The timer tick as a std duration. Never zero.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Same config with all random embellishment switched off.
    pub fn plain(mut self) -> Self {
        self.encouragement_chance = 0.0;
        self.modifier_chance = 0.0;
        self
    }

    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }
}
