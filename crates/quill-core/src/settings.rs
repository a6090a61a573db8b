//! Generation settings and partial updates.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use thiserror::Error;

pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.0..=2.0;
pub const TOP_P_RANGE: RangeInclusive<f64> = 0.0..=1.0;
pub const MAX_TOKENS_RANGE: RangeInclusive<u32> = 100..=4096;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

/// Process-wide generation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub selected_model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub stream_response: bool,
    pub save_history: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            selected_model: "llama2-7b".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 2048,
            stream_response: true,
            save_history: true,
        }
    }
}

/// A partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_response: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_history: Option<bool>,
}

impl SettingsPatch {
    pub fn selected_model(mut self, model: impl Into<String>) -> Self {
        self.selected_model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn stream_response(mut self, stream: bool) -> Self {
        self.stream_response = Some(stream);
        self
    }

    pub fn save_history(mut self, save: bool) -> Self {
        self.save_history = Some(save);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl GenerationSettings {
    /// Validate `patch` and return the merged settings.
    ///
    /// `self` is never touched, so a rejected patch leaves prior settings intact.
    pub fn merged(
        &self,
        patch: &SettingsPatch,
        is_known_model: impl Fn(&str) -> bool,
    ) -> Result<GenerationSettings, SettingsError> {
        let mut next = self.clone();

        if let Some(model) = &patch.selected_model {
            if !is_known_model(model) {
                return Err(SettingsError::UnknownModel(model.clone()));
            }
            next.selected_model = model.clone();
        }
        if let Some(temperature) = patch.temperature {
            next.temperature = check_float("temperature", temperature, &TEMPERATURE_RANGE)?;
        }
        if let Some(top_p) = patch.top_p {
            next.top_p = check_float("topP", top_p, &TOP_P_RANGE)?;
        }
        if let Some(max_tokens) = patch.max_tokens {
            if !MAX_TOKENS_RANGE.contains(&max_tokens) {
                return Err(SettingsError::OutOfRange {
                    field: "maxTokens",
                    value: f64::from(max_tokens),
                    min: f64::from(*MAX_TOKENS_RANGE.start()),
                    max: f64::from(*MAX_TOKENS_RANGE.end()),
                });
            }
            next.max_tokens = max_tokens;
        }
        if let Some(stream) = patch.stream_response {
            next.stream_response = stream;
        }
        if let Some(save) = patch.save_history {
            next.save_history = save;
        }

        Ok(next)
    }
}

fn check_float(
    field: &'static str,
    value: f64,
    range: &RangeInclusive<f64>,
) -> Result<f64, SettingsError> {
    if !value.is_finite() {
        return Err(SettingsError::NotFinite { field });
    }
    if !range.contains(&value) {
        return Err(SettingsError::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_model(_: &str) -> bool {
        true
    }

    #[test]
    fn defaults_match_catalog_default() {
        let settings = GenerationSettings::default();
        assert_eq!(settings.selected_model, "llama2-7b");
        assert_eq!(settings.temperature, 0.7);
        assert_eq!(settings.top_p, 0.9);
        assert_eq!(settings.max_tokens, 2048);
        assert!(settings.stream_response);
        assert!(settings.save_history);
    }

    #[test]
    fn merge_only_touches_present_fields() {
        let settings = GenerationSettings::default();
        let patch = SettingsPatch::default().temperature(1.2).stream_response(false);

        let merged = settings.merged(&patch, any_model).unwrap();

        assert_eq!(merged.temperature, 1.2);
        assert!(!merged.stream_response);
        assert_eq!(merged.top_p, settings.top_p);
        assert_eq!(merged.max_tokens, settings.max_tokens);
        assert_eq!(merged.selected_model, settings.selected_model);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let settings = GenerationSettings::default();
        let patch = SettingsPatch::default()
            .temperature(2.0)
            .top_p(0.0)
            .max_tokens(100);
        assert!(settings.merged(&patch, any_model).is_ok());

        let patch = SettingsPatch::default().max_tokens(4096);
        assert!(settings.merged(&patch, any_model).is_ok());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let settings = GenerationSettings::default();
        let err = settings
            .merged(&SettingsPatch::default().temperature(5.0), any_model)
            .unwrap_err();

        match err {
            SettingsError::OutOfRange { field, value, .. } => {
                assert_eq!(field, "temperature");
                assert_eq!(value, 5.0);
            }
            other => panic!("Expected OutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_top_p_and_max_tokens() {
        let settings = GenerationSettings::default();
        assert!(settings
            .merged(&SettingsPatch::default().top_p(1.5), any_model)
            .is_err());
        assert!(settings
            .merged(&SettingsPatch::default().max_tokens(99), any_model)
            .is_err());
        assert!(settings
            .merged(&SettingsPatch::default().max_tokens(5000), any_model)
            .is_err());
    }

    #[test]
    fn rejects_nan() {
        let settings = GenerationSettings::default();
        let err = settings
            .merged(&SettingsPatch::default().temperature(f64::NAN), any_model)
            .unwrap_err();
        assert_eq!(err, SettingsError::NotFinite { field: "temperature" });
    }

    #[test]
    fn rejects_unknown_model() {
        let settings = GenerationSettings::default();
        let err = settings
            .merged(&SettingsPatch::default().selected_model("gpt-9"), |id| {
                id == "llama2-7b"
            })
            .unwrap_err();
        assert_eq!(err, SettingsError::UnknownModel("gpt-9".to_string()));
    }

    #[test]
    fn invalid_field_rejects_whole_patch() {
        let settings = GenerationSettings::default();
        let patch = SettingsPatch::default().stream_response(false).temperature(-1.0);
        assert!(settings.merged(&patch, any_model).is_err());
        assert!(settings.stream_response);
    }

    #[test]
    fn patch_deserializes_from_partial_json() {
        let patch: SettingsPatch = serde_json::from_str(r#"{"topP": 0.5}"#).unwrap();
        assert_eq!(patch.top_p, Some(0.5));
        assert!(patch.temperature.is_none());
        assert!(!patch.is_empty());
        assert!(SettingsPatch::default().is_empty());
    }

    #[test]
    fn error_messages_name_the_field() {
        let err = SettingsError::OutOfRange {
            field: "temperature",
            value: 5.0,
            min: 0.0,
            max: 2.0,
        };
        assert_eq!(err.to_string(), "temperature must be between 0 and 2, got 5");
    }
}
