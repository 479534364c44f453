//! Grouping of diagnosis keys into distribution buckets.
//!
//! Keys are assigned to the countries they concern and to the hour at
//! which they may first be published. The EU package carries the union of
//! every country's keys.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, DurationRound, NaiveDate, NaiveDateTime};
use exposure_keys::DiagnosisKey;
use tracing::{debug, error, warn};

use crate::config::{ApiConfig, BundlingConfig};

type HourBuckets = BTreeMap<NaiveDateTime, Vec<DiagnosisKey>>;

pub struct DiagnosisKeyBundler {
    supported_countries: Vec<String>,
    origin_country: String,
    eu_package_name: String,
    expiry_policy: Duration,
    shifting_policy_threshold: usize,
    maximum_number_of_keys_per_bundle: usize,
    apply_policies_for_all_countries: bool,
    /// Exclusive upper bound of distributable hours.
    cutoff: NaiveDateTime,
    distribution_time: NaiveDateTime,
    distributable: BTreeMap<String, HourBuckets>,
}

impl DiagnosisKeyBundler {
    /// Bundle `keys` for a run at `distribution_time`, which must be the
    /// start of an hour.
    pub fn new(
        bundling: &BundlingConfig,
        api: &ApiConfig,
        keys: impl IntoIterator<Item = DiagnosisKey>,
        distribution_time: NaiveDateTime,
    ) -> Self {
        let cutoff = if bundling.include_incomplete_hours {
            distribution_time + Duration::hours(1)
        } else {
            distribution_time
        };
        let mut bundler = Self {
            supported_countries: api.supported_countries.clone(),
            origin_country: api.origin_country.clone(),
            eu_package_name: api.eu_package_name.clone(),
            expiry_policy: Duration::minutes(bundling.expiry_policy_minutes as i64),
            shifting_policy_threshold: bundling.shifting_policy_threshold,
            maximum_number_of_keys_per_bundle: bundling.maximum_number_of_keys_per_bundle,
            apply_policies_for_all_countries: bundling.apply_policies_for_all_countries,
            cutoff,
            distribution_time,
            distributable: BTreeMap::new(),
        };
        bundler.distribute(keys);
        bundler
    }

    pub fn distribution_time(&self) -> NaiveDateTime {
        self.distribution_time
    }

    /// Supported countries followed by the EU package.
    pub fn countries(&self) -> Vec<String> {
        let mut countries = self.supported_countries.clone();
        countries.push(self.eu_package_name.clone());
        countries
    }

    /// Dates with at least one bucket, in ascending order.
    pub fn dates(&self, country: &str) -> Vec<NaiveDate> {
        let Some(buckets) = self.buckets(country) else {
            return Vec::new();
        };
        let dates: BTreeSet<NaiveDate> = buckets.keys().map(NaiveDateTime::date).collect();
        dates
            .into_iter()
            .filter(|date| self.below_maximum(self.keys_for_date(*date, country).len(), date))
            .collect()
    }

    /// Hours of `date` with a bucket, in ascending order. Empty
    /// placeholder buckets are included.
    pub fn hours(&self, date: NaiveDate, country: &str) -> Vec<NaiveDateTime> {
        let Some(buckets) = self.buckets(country) else {
            return Vec::new();
        };
        buckets
            .iter()
            .filter(|(hour, _)| hour.date() == date)
            .filter(|(hour, keys)| self.below_maximum(keys.len(), hour))
            .map(|(hour, _)| *hour)
            .collect()
    }

    pub fn keys_for_hour(&self, hour: NaiveDateTime, country: &str) -> &[DiagnosisKey] {
        self.buckets(country)
            .and_then(|buckets| buckets.get(&hour))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn keys_for_date(&self, date: NaiveDate, country: &str) -> Vec<DiagnosisKey> {
        self.buckets(country)
            .into_iter()
            .flat_map(|buckets| buckets.iter())
            .filter(|(hour, _)| hour.date() == date)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    #[cfg(test)]
    fn all_keys(&self, country: &str) -> Vec<&DiagnosisKey> {
        self.buckets(country)
            .into_iter()
            .flat_map(|buckets| buckets.values().flatten())
            .collect()
    }

    fn buckets(&self, country: &str) -> Option<&HourBuckets> {
        let buckets = self.distributable.get(country);
        if buckets.is_none() {
            warn!(country, "country is not supported");
        }
        buckets
    }

    fn below_maximum(&self, count: usize, bucket: &impl std::fmt::Display) -> bool {
        if count > self.maximum_number_of_keys_per_bundle {
            error!(
                count,
                maximum = self.maximum_number_of_keys_per_bundle,
                %bucket,
                "number of diagnosis keys exceeds the configured maximum"
            );
            return false;
        }
        true
    }

    fn distribute(&mut self, keys: impl IntoIterator<Item = DiagnosisKey>) {
        let mut grouped: BTreeMap<String, Vec<DiagnosisKey>> = self
            .supported_countries
            .iter()
            .map(|country| (country.clone(), Vec::new()))
            .collect();
        for key in keys {
            for country in self.target_countries(&key) {
                if let Some(group) = grouped.get_mut(&country) {
                    group.push(key.clone());
                }
            }
        }

        for (country, keys) in grouped {
            let buckets = if country == self.origin_country || self.apply_policies_for_all_countries {
                self.buckets_with_policies(keys)
            } else {
                self.buckets_without_policies(keys)
            };
            debug!(country = %country, hours = buckets.len(), "bundled diagnosis keys");
            self.distributable.insert(country, buckets);
        }

        let eu_package = self.eu_package();
        self.distributable.insert(self.eu_package_name.clone(), eu_package);
    }

    /// Countries a key is published for.
    fn target_countries(&self, key: &DiagnosisKey) -> Vec<String> {
        // Keys without visited countries predate federation and belong to their own origin.
        if key.visited_countries().is_empty() {
            return self
                .supported_countries
                .iter()
                .filter(|country| *country == key.origin_country())
                .cloned()
                .collect();
        }
        let from_origin = key.origin_country() == self.origin_country;
        let visited_origin = key.visited_countries().contains(&self.origin_country);
        key.visited_countries()
            .iter()
            .filter(|country| self.supported_countries.contains(country))
            .filter(|country| {
                *country == &self.origin_country || (!from_origin && !visited_origin)
            })
            .cloned()
            .collect()
    }

    fn buckets_without_policies(&self, keys: Vec<DiagnosisKey>) -> HourBuckets {
        let mut buckets = HourBuckets::new();
        for key in keys {
            let hour = key.submission_hour();
            if hour < self.cutoff {
                buckets.entry(hour).or_default().push(key);
            }
        }
        buckets
    }

    /// Expiry policy followed by the shifting policy.
    fn buckets_with_policies(&self, keys: Vec<DiagnosisKey>) -> HourBuckets {
        let mut by_expiry = HourBuckets::new();
        for key in keys {
            by_expiry.entry(self.earliest_sharing_time(&key)).or_default().push(key);
        }

        let mut buckets = HourBuckets::new();
        let Some(mut hour) = by_expiry.keys().next().copied() else {
            return buckets;
        };
        let mut accumulator = Vec::new();
        while hour < self.cutoff {
            if let Some(keys) = by_expiry.remove(&hour) {
                accumulator.extend(keys);
            }
            if !accumulator.is_empty() && accumulator.len() >= self.shifting_policy_threshold {
                buckets.insert(hour, std::mem::take(&mut accumulator));
            } else {
                buckets.insert(hour, Vec::new());
            }
            hour += Duration::hours(1);
        }
        buckets
    }

    /// Keys expired for less than the policy at submission are held back
    /// until the policy has passed, rounded up to the next full hour.
    fn earliest_sharing_time(&self, key: &DiagnosisKey) -> NaiveDateTime {
        let submission = key.submission_hour();
        let expiry = key.expiry_time();
        if submission - expiry <= self.expiry_policy {
            let padded = expiry + self.expiry_policy + Duration::hours(1);
            padded.duration_trunc(Duration::hours(1)).unwrap_or(padded)
        } else {
            submission
        }
    }

    fn eu_package(&self) -> HourBuckets {
        let mut union: BTreeMap<NaiveDateTime, BTreeMap<(Vec<u8>, u32), DiagnosisKey>> =
            BTreeMap::new();
        for buckets in self.distributable.values() {
            for (hour, keys) in buckets {
                let entry = union.entry(*hour).or_default();
                for key in keys {
                    entry
                        .entry((key.key_data().to_vec(), key.rolling_start_interval_number()))
                        .or_insert_with(|| key.clone());
                }
            }
        }
        union
            .into_iter()
            .map(|(hour, keys)| (hour, keys.into_values().collect()))
            .collect()
    }
}
