//! Normalization of key fields before export.
//!
//! Exported keys carry the days-since-onset-of-symptoms and report type
//! fields consumed by version 2 of the exposure notification framework.
//! Older submissions only carry a transmission risk level, so those fields
//! are derived from it here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::ReportType;
use crate::{MAX_TRANSMISSION_RISK_LEVEL, MIN_TRANSMISSION_RISK_LEVEL};

/// Days-since-onset values the framework accepts as encoded risk.
const ENCODED_DSOS_VALUES: [i32; 2] = [1, 2];

/// Key fields after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedFields {
    pub transmission_risk_level: i32,
    pub days_since_onset_of_symptoms: i32,
    /// Report type derived from the risk level, if the normalizer has one.
    pub report_type: Option<ReportType>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("transmission risk level {0} has no mapped {1}")]
    Unmapped(i32, &'static str),

    #[error("invalid encoding table: {0}")]
    InvalidEncoding(String),
}

/// Applied once per key before it is mapped into an export file.
pub trait KeyNormalizer: Send + Sync {
    fn normalize(
        &self,
        transmission_risk_level: i32,
        days_since_onset_of_symptoms: Option<i32>,
    ) -> Result<NormalizedFields, NormalizationError>;
}

/// Encodes the transmission risk level into days since onset of symptoms
/// and report type for keys that were submitted without them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionRiskEncoding {
    pub transmission_risk_to_days_since_symptoms: BTreeMap<i32, i32>,
    pub transmission_risk_to_report_type: BTreeMap<i32, ReportType>,
}

impl Default for TransmissionRiskEncoding {
    fn default() -> Self {
        let levels = MIN_TRANSMISSION_RISK_LEVEL..=MAX_TRANSMISSION_RISK_LEVEL;
        Self {
            transmission_risk_to_days_since_symptoms: levels
                .clone()
                .map(|trl| (trl, if trl <= 4 { 1 } else { 2 }))
                .collect(),
            transmission_risk_to_report_type: levels
                .map(|trl| (trl, ReportType::ConfirmedTest))
                .collect(),
        }
    }
}

impl TransmissionRiskEncoding {
    /// Check that both tables cover only valid levels and allowed values.
    pub fn validate(&self) -> Result<(), NormalizationError> {
        let levels = MIN_TRANSMISSION_RISK_LEVEL..=MAX_TRANSMISSION_RISK_LEVEL;
        if self.transmission_risk_to_days_since_symptoms.is_empty()
            || self.transmission_risk_to_report_type.is_empty()
        {
            return Err(NormalizationError::InvalidEncoding(
                "encoding tables must not be empty".to_string(),
            ));
        }
        for (trl, dsos) in &self.transmission_risk_to_days_since_symptoms {
            if !levels.contains(trl) || !ENCODED_DSOS_VALUES.contains(dsos) {
                return Err(NormalizationError::InvalidEncoding(format!(
                    "transmission risk level {} mapped to days since symptoms {}",
                    trl, dsos
                )));
            }
        }
        for (trl, report_type) in &self.transmission_risk_to_report_type {
            if !levels.contains(trl) || *report_type == ReportType::Unknown {
                return Err(NormalizationError::InvalidEncoding(format!(
                    "transmission risk level {} mapped to report type {:?}",
                    trl, report_type
                )));
            }
        }
        Ok(())
    }
}

impl KeyNormalizer for TransmissionRiskEncoding {
    fn normalize(
        &self,
        transmission_risk_level: i32,
        days_since_onset_of_symptoms: Option<i32>,
    ) -> Result<NormalizedFields, NormalizationError> {
        let days_since_onset_of_symptoms = match days_since_onset_of_symptoms {
            Some(dsos) => dsos,
            None => *self
                .transmission_risk_to_days_since_symptoms
                .get(&transmission_risk_level)
                .ok_or(NormalizationError::Unmapped(
                    transmission_risk_level,
                    "days since onset of symptoms",
                ))?,
        };
        let report_type = self
            .transmission_risk_to_report_type
            .get(&transmission_risk_level)
            .copied()
            .ok_or(NormalizationError::Unmapped(transmission_risk_level, "report type"))?;

        Ok(NormalizedFields {
            transmission_risk_level,
            days_since_onset_of_symptoms,
            report_type: Some(report_type),
        })
    }
}

/// Publishes every key with days since onset of symptoms set to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetDaysSinceOnset;

impl KeyNormalizer for ResetDaysSinceOnset {
    fn normalize(
        &self,
        transmission_risk_level: i32,
        _days_since_onset_of_symptoms: Option<i32>,
    ) -> Result<NormalizedFields, NormalizationError> {
        Ok(NormalizedFields {
            transmission_risk_level,
            days_since_onset_of_symptoms: 0,
            report_type: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_encoding_is_valid() {
        TransmissionRiskEncoding::default().validate().unwrap();
    }

    #[test]
    fn test_missing_dsos_derived_from_risk_level() {
        let encoding = TransmissionRiskEncoding::default();
        let low = encoding.normalize(2, None).unwrap();
        let high = encoding.normalize(7, None).unwrap();
        assert_eq!(low.days_since_onset_of_symptoms, 1);
        assert_eq!(high.days_since_onset_of_symptoms, 2);
        assert_eq!(high.report_type, Some(ReportType::ConfirmedTest));
    }

    #[test]
    fn test_present_dsos_kept() {
        let fields = TransmissionRiskEncoding::default().normalize(6, Some(-3)).unwrap();
        assert_eq!(fields.days_since_onset_of_symptoms, -3);
        assert_eq!(fields.transmission_risk_level, 6);
    }

    #[test]
    fn test_unmapped_level_rejected() {
        let mut encoding = TransmissionRiskEncoding::default();
        encoding.transmission_risk_to_days_since_symptoms.remove(&3);
        assert_eq!(
            encoding.normalize(3, None),
            Err(NormalizationError::Unmapped(3, "days since onset of symptoms"))
        );
    }

    #[test]
    fn test_invalid_dsos_value_fails_validation() {
        let mut encoding = TransmissionRiskEncoding::default();
        encoding.transmission_risk_to_days_since_symptoms.insert(1, 14);
        assert!(matches!(
            encoding.validate(),
            Err(NormalizationError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_reset_zeroes_dsos() {
        let fields = ResetDaysSinceOnset.normalize(4, Some(10)).unwrap();
        assert_eq!(fields.days_since_onset_of_symptoms, 0);
        assert_eq!(fields.report_type, None);
    }
}
