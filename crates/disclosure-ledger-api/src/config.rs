//! Pipeline configuration loaded from YAML.

use std::collections::BTreeMap;
use std::path::Path;

use disclosure_ledger_core::{
    apply_tolerance_overrides, cross_year_formulas, within_year_formulas, DiffOptions, Formula,
    DEFAULT_LOW_SIMILARITY_THRESHOLD, DEFAULT_MAX_EDIT_DISTANCE, MAX_EDIT_DISTANCE_CEILING,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Formula id to tolerance, replacing the built-in tolerance.
    pub tolerance_overrides: BTreeMap<String, f64>,
    /// Section titles left out of the similarity average.
    pub similarity_excluded_titles: Vec<String>,
    /// Titles containing any of these are left out of the similarity average.
    pub similarity_excluded_title_fragments: Vec<String>,
    pub low_similarity_threshold: u8,
    pub diff_max_edit_distance: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let diff = DiffOptions::default();
        Self {
            tolerance_overrides: BTreeMap::new(),
            similarity_excluded_titles: diff.excluded_titles,
            similarity_excluded_title_fragments: diff.excluded_title_fragments,
            low_similarity_threshold: DEFAULT_LOW_SIMILARITY_THRESHOLD,
            diff_max_edit_distance: DEFAULT_MAX_EDIT_DISTANCE,
        }
    }
}

impl PipelineConfig {
    /// Parse a YAML config file from a path
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read, parsed or validated.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(content.as_str())
    }

    /// Parse a YAML config from a string; an empty document yields the defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the YAML is malformed or fails validation.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.low_similarity_threshold > 100 {
            return Err(ConfigError::Validation(format!(
                "low_similarity_threshold must be within 0..=100, got {}",
                self.low_similarity_threshold
            )));
        }
        if self.diff_max_edit_distance > MAX_EDIT_DISTANCE_CEILING {
            return Err(ConfigError::Validation(format!(
                "diff_max_edit_distance must be at most {MAX_EDIT_DISTANCE_CEILING}, got {}",
                self.diff_max_edit_distance
            )));
        }

        let known = within_year_formulas()
            .into_iter()
            .chain(cross_year_formulas())
            .map(|formula| formula.id)
            .collect::<Vec<_>>();
        for (formula_id, tolerance) in &self.tolerance_overrides {
            if !known.contains(formula_id) {
                return Err(ConfigError::Validation(format!(
                    "tolerance override names unknown formula: {formula_id}"
                )));
            }
            if !tolerance.is_finite() || *tolerance < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "tolerance for {formula_id} must be a finite non-negative number"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            excluded_titles: self.similarity_excluded_titles.clone(),
            excluded_title_fragments: self.similarity_excluded_title_fragments.clone(),
            low_similarity_threshold: self.low_similarity_threshold,
            max_edit_distance: self.diff_max_edit_distance,
        }
    }

    /// Built-in within-year formulas with configured tolerances applied.
    ///
    /// # Errors
    /// Returns [`ConfigError::Validation`] when an override is invalid.
    pub fn within_year_formulas(&self) -> Result<Vec<Formula>, ConfigError> {
        self.with_overrides(within_year_formulas())
    }

    /// Built-in cross-year formulas with configured tolerances applied.
    ///
    /// # Errors
    /// Returns [`ConfigError::Validation`] when an override is invalid.
    pub fn cross_year_formulas(&self) -> Result<Vec<Formula>, ConfigError> {
        self.with_overrides(cross_year_formulas())
    }

    fn with_overrides(&self, mut formulas: Vec<Formula>) -> Result<Vec<Formula>, ConfigError> {
        let applicable = self
            .tolerance_overrides
            .iter()
            .filter(|(formula_id, _)| formulas.iter().any(|formula| &formula.id == *formula_id))
            .map(|(formula_id, tolerance)| (formula_id.clone(), *tolerance))
            .collect::<BTreeMap<_, _>>();
        apply_tolerance_overrides(&mut formulas, &applicable)
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        Ok(formulas)
    }
}
