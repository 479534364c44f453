//! The diagnosis key entity.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    KEY_DATA_LENGTH, MAX_DAYS_SINCE_ONSET_OF_SYMPTOMS, MAX_ROLLING_PERIOD,
    MAX_TRANSMISSION_RISK_LEVEL, MIN_DAYS_SINCE_ONSET_OF_SYMPTOMS, MIN_TRANSMISSION_RISK_LEVEL,
};

/// Length of one rolling interval.
const ROLLING_INTERVAL_SECONDS: i64 = 600;

/// How the diagnosis behind a key was established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    #[default]
    Unknown,
    ConfirmedTest,
    ConfirmedClinicalDiagnosis,
    SelfReport,
    Recursive,
    Revoked,
}

impl ReportType {
    pub fn to_proto(self) -> exposure_protocol::ReportType {
        use exposure_protocol::ReportType as Proto;
        match self {
            ReportType::Unknown => Proto::Unknown,
            ReportType::ConfirmedTest => Proto::ConfirmedTest,
            ReportType::ConfirmedClinicalDiagnosis => Proto::ConfirmedClinicalDiagnosis,
            ReportType::SelfReport => Proto::SelfReport,
            ReportType::Recursive => Proto::Recursive,
            ReportType::Revoked => Proto::Revoked,
        }
    }
}

/// A temporary exposure key published by a diagnosed user.
///
/// Instances are immutable. Build them with [`DiagnosisKeyBuilder`] or
/// deserialize them and call [`DiagnosisKey::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiagnosisKey {
    #[serde(with = "key_data_base64")]
    key_data: [u8; KEY_DATA_LENGTH],
    rolling_start_interval_number: u32,
    rolling_period: u32,
    transmission_risk_level: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    days_since_onset_of_symptoms: Option<i32>,
    #[serde(default)]
    report_type: ReportType,
    origin_country: String,
    #[serde(default)]
    visited_countries: BTreeSet<String>,
    /// Hours since the epoch.
    submission_timestamp: u64,
}

impl DiagnosisKey {
    pub fn key_data(&self) -> &[u8; KEY_DATA_LENGTH] {
        &self.key_data
    }

    pub fn rolling_start_interval_number(&self) -> u32 {
        self.rolling_start_interval_number
    }

    pub fn rolling_period(&self) -> u32 {
        self.rolling_period
    }

    pub fn transmission_risk_level(&self) -> i32 {
        self.transmission_risk_level
    }

    pub fn days_since_onset_of_symptoms(&self) -> Option<i32> {
        self.days_since_onset_of_symptoms
    }

    pub fn report_type(&self) -> ReportType {
        self.report_type
    }

    pub fn origin_country(&self) -> &str {
        &self.origin_country
    }

    pub fn visited_countries(&self) -> &BTreeSet<String> {
        &self.visited_countries
    }

    pub fn submission_timestamp(&self) -> u64 {
        self.submission_timestamp
    }

    /// Start of the hour the key was submitted in.
    pub fn submission_hour(&self) -> NaiveDateTime {
        epoch() + Duration::hours(self.submission_timestamp as i64)
    }

    /// Moment the key stops being used for broadcasting.
    pub fn expiry_time(&self) -> NaiveDateTime {
        let end = self.rolling_start_interval_number as i64 + self.rolling_period as i64;
        epoch() + Duration::seconds(end * ROLLING_INTERVAL_SECONDS)
    }

    /// Whether the key concerns `region`, either as origin or as a visited country.
    pub fn concerns(&self, region: &str) -> bool {
        self.origin_country == region || self.visited_countries.contains(region)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), KeyValidationError> {
        let mut violations = Vec::new();

        if i32::try_from(self.rolling_start_interval_number).is_err() {
            violations.push(format!(
                "rolling start interval number {} exceeds {}",
                self.rolling_start_interval_number,
                i32::MAX
            ));
        }
        if self.rolling_period == 0 || self.rolling_period > MAX_ROLLING_PERIOD {
            violations.push(format!(
                "rolling period {} outside 1..={}",
                self.rolling_period, MAX_ROLLING_PERIOD
            ));
        }
        if !(MIN_TRANSMISSION_RISK_LEVEL..=MAX_TRANSMISSION_RISK_LEVEL)
            .contains(&self.transmission_risk_level)
        {
            violations.push(format!(
                "transmission risk level {} outside {}..={}",
                self.transmission_risk_level,
                MIN_TRANSMISSION_RISK_LEVEL,
                MAX_TRANSMISSION_RISK_LEVEL
            ));
        }
        if let Some(dsos) = self.days_since_onset_of_symptoms {
            if !(MIN_DAYS_SINCE_ONSET_OF_SYMPTOMS..=MAX_DAYS_SINCE_ONSET_OF_SYMPTOMS).contains(&dsos)
            {
                violations.push(format!("days since onset of symptoms {} out of range", dsos));
            }
        }
        if !is_country_code(&self.origin_country) {
            violations.push(format!("invalid origin country {:?}", self.origin_country));
        }
        for country in &self.visited_countries {
            if !is_country_code(country) {
                violations.push(format!("invalid visited country {:?}", country));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(KeyValidationError { violations })
        }
    }
}

fn epoch() -> NaiveDateTime {
    DateTime::<Utc>::UNIX_EPOCH.naive_utc()
}

fn is_country_code(code: &str) -> bool {
    (2..=3).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// A key failed validation. Lists every violated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidationError {
    pub violations: Vec<String>,
}

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid diagnosis key: {}", self.violations.join("; "))
    }
}

impl std::error::Error for KeyValidationError {}

/// Builder for validated [`DiagnosisKey`] instances.
#[derive(Debug, Clone)]
pub struct DiagnosisKeyBuilder {
    key_data: Vec<u8>,
    rolling_start_interval_number: u32,
    rolling_period: u32,
    transmission_risk_level: i32,
    days_since_onset_of_symptoms: Option<i32>,
    report_type: ReportType,
    origin_country: String,
    visited_countries: BTreeSet<String>,
    submission_timestamp: u64,
}

impl DiagnosisKeyBuilder {
    pub fn new(key_data: impl Into<Vec<u8>>) -> Self {
        Self {
            key_data: key_data.into(),
            rolling_start_interval_number: 0,
            rolling_period: MAX_ROLLING_PERIOD,
            transmission_risk_level: MIN_TRANSMISSION_RISK_LEVEL,
            days_since_onset_of_symptoms: None,
            report_type: ReportType::ConfirmedTest,
            origin_country: String::new(),
            visited_countries: BTreeSet::new(),
            submission_timestamp: 0,
        }
    }

    pub fn rolling_start_interval_number(mut self, value: u32) -> Self {
        self.rolling_start_interval_number = value;
        self
    }

    pub fn rolling_period(mut self, value: u32) -> Self {
        self.rolling_period = value;
        self
    }

    pub fn transmission_risk_level(mut self, value: i32) -> Self {
        self.transmission_risk_level = value;
        self
    }

    pub fn days_since_onset_of_symptoms(mut self, value: i32) -> Self {
        self.days_since_onset_of_symptoms = Some(value);
        self
    }

    pub fn report_type(mut self, value: ReportType) -> Self {
        self.report_type = value;
        self
    }

    pub fn origin_country(mut self, value: impl Into<String>) -> Self {
        self.origin_country = value.into();
        self
    }

    pub fn visited_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.visited_countries = countries.into_iter().map(Into::into).collect();
        self
    }

    /// Submission time in hours since the epoch.
    pub fn submission_timestamp(mut self, hours: u64) -> Self {
        self.submission_timestamp = hours;
        self
    }

    pub fn build(self) -> Result<DiagnosisKey, KeyValidationError> {
        let key_data: [u8; KEY_DATA_LENGTH] =
            self.key_data.as_slice().try_into().map_err(|_| KeyValidationError {
                violations: vec![format!(
                    "key data must be {} bytes, got {}",
                    KEY_DATA_LENGTH,
                    self.key_data.len()
                )],
            })?;

        let key = DiagnosisKey {
            key_data,
            rolling_start_interval_number: self.rolling_start_interval_number,
            rolling_period: self.rolling_period,
            transmission_risk_level: self.transmission_risk_level,
            days_since_onset_of_symptoms: self.days_since_onset_of_symptoms,
            report_type: self.report_type,
            origin_country: self.origin_country,
            visited_countries: self.visited_countries,
            submission_timestamp: self.submission_timestamp,
        };
        key.validate()?;
        Ok(key)
    }
}

mod key_data_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::KEY_DATA_LENGTH;

    pub fn serialize<S: Serializer>(bytes: &[u8; KEY_DATA_LENGTH], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; KEY_DATA_LENGTH], D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)?;
        bytes.as_slice().try_into().map_err(|_| {
            de::Error::custom(format!(
                "key data must be {} bytes, got {}",
                KEY_DATA_LENGTH,
                bytes.len()
            ))
        })
    }
}
