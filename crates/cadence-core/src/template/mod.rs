//! Session templates: ordered, timed phases of instructions.
//!
//! Templates are immutable once a session starts. The engine only reads them;
//! authoring the text is someone else's job.

mod defaults;
mod store;

pub use defaults::default_templates;
pub use store::{InMemoryTemplateStore, TemplateStore};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::session::Intensity;

/// Upper bound for a single phase. Keeps timestamp arithmetic far from overflow.
pub const MAX_PHASE_SECS: u64 = 24 * 60 * 60;

/// One timed segment of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDefinition {
    pub name: String,
    pub duration_secs: u64,
    #[serde(default)]
    pub instructions: Vec<String>,
}

impl PhaseDefinition {
    pub fn new<I, S>(name: impl Into<String>, duration_secs: u64, instructions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            duration_secs,
            instructions: instructions.into_iter().map(Into::into).collect(),
        }
    }
}

/// A reusable session definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTemplate {
    /// Lookup key in the template store. May be omitted in keyed JSON files.
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Default intensity when neither the caller nor the user's preferences pick one.
    #[serde(default)]
    pub intensity: Intensity,

    pub phases: Vec<PhaseDefinition>,

    /// Optional phrases occasionally appended to instructions.
    #[serde(default)]
    pub encouragements: Vec<String>,
}

impl SessionTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, phases: Vec<PhaseDefinition>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            intensity: Intensity::default(),
            phases,
            encouragements: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_intensity(mut self, intensity: Intensity) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_encouragements<I, S>(mut self, encouragements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encouragements = encouragements.into_iter().map(Into::into).collect();
        self
    }

    /// Sum of all phase durations.
    pub fn total_duration_secs(&self) -> u64 {
        self.phases.iter().map(|p| p.duration_secs).sum()
    }

    /// Check the structural invariants the scheduler relies on.
    ///
    /// Empty instruction lists are allowed; the scheduler falls back to filler text.
    pub fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(EngineError::InvalidTemplate(format!(
                "template '{}' has no phases",
                self.name
            )));
        }
        for phase in &self.phases {
            if phase.duration_secs == 0 {
                return Err(EngineError::InvalidTemplate(format!(
                    "phase '{}' of template '{}' has zero duration",
                    phase.name, self.name
                )));
            }
            if phase.duration_secs > MAX_PHASE_SECS {
                return Err(EngineError::InvalidTemplate(format!(
                    "phase '{}' of template '{}' exceeds {} seconds",
                    phase.name, self.name, MAX_PHASE_SECS
                )));
            }
        }
        Ok(())
    }

    /// Copy of this template whose phases add up to exactly `total_secs`.
    ///
    /// Each phase keeps its share of the original. Integer seconds are
    /// distributed by largest remainder, and every phase keeps at least one second.
    pub fn rescaled(&self, total_secs: u64) -> Result<SessionTemplate> {
        self.validate()?;

        let phase_count = self.phases.len() as u64;
        if total_secs == 0 {
            return Err(EngineError::InvalidDuration(
                "requested duration must be positive".to_string(),
            ));
        }
        if total_secs < phase_count {
            return Err(EngineError::InvalidDuration(format!(
                "{total_secs}s is too short for {phase_count} phases"
            )));
        }
        if total_secs > MAX_PHASE_SECS.saturating_mul(phase_count) {
            return Err(EngineError::InvalidDuration(format!(
                "{total_secs}s exceeds the longest supported session"
            )));
        }

        let original = u128::from(self.total_duration_secs());
        if original == u128::from(total_secs) {
            return Ok(self.clone());
        }

        let target = u128::from(total_secs);
        let mut durations = Vec::with_capacity(self.phases.len());
        let mut remainders = Vec::with_capacity(self.phases.len());
        for (index, phase) in self.phases.iter().enumerate() {
            let scaled = u128::from(phase.duration_secs) * target;
            durations.push((scaled / original) as u64);
            remainders.push((scaled % original, index));
        }

        let assigned: u64 = durations.iter().sum();
        let leftover = (total_secs - assigned) as usize;
        remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        for &(_, index) in remainders.iter().take(leftover) {
            durations[index] += 1;
        }

        // A tiny phase may have rounded down to nothing; borrow from the longest.
        for index in 0..durations.len() {
            if durations[index] == 0 {
                if let Some(longest) = (0..durations.len()).max_by_key(|&i| durations[i]) {
                    durations[longest] -= 1;
                    durations[index] = 1;
                }
            }
        }

        if let Some(index) = durations.iter().position(|&d| d > MAX_PHASE_SECS) {
            return Err(EngineError::InvalidDuration(format!(
                "{total_secs}s would stretch phase '{}' past {} seconds",
                self.phases[index].name, MAX_PHASE_SECS
            )));
        }

        let mut rescaled = self.clone();
        for (phase, duration) in rescaled.phases.iter_mut().zip(durations) {
            phase.duration_secs = duration;
        }
        Ok(rescaled)
    }

    /// Lightweight listing entry.
    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            duration_minutes: self.total_duration_secs() as f64 / 60.0,
            intensity: self.intensity,
            phase_count: self.phases.len(),
        }
    }
}

/// What a caller sees when browsing available sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub duration_minutes: f64,
    pub intensity: Intensity,
    pub phase_count: usize,
}
