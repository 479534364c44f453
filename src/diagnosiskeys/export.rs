//! Assembly of binary key export archives.
//!
//! The keys of one bucket are scoped to a region, normalized, put in a
//! deterministic order and split into batches. Every batch becomes an
//! archive holding `export.bin` and its `export.sig`, with a checksum
//! sidecar next to the archive.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use exposure_keys::{DiagnosisKey, KeyNormalizer, KeyValidationError, ReportType};
use exposure_protocol::{
    decode_export, encode_export, ExportHeader, SignatureInfo, TekSignature, TekSignatureList,
    TemporaryExposureKey, TemporaryExposureKeyExport,
};
use prost::Message;
use tracing::debug;

use crate::config::{DistributionConfig, SignatureConfig};
use crate::crypto::CryptoProvider;
use crate::error::{AssemblyError, AssemblyResult};
use crate::structure::decorator::{ArchiveSigningDecorator, ChecksumDecorator, SignatureFile};
use crate::structure::{ArchiveOnDisk, Directory, File, FileOnDisk, IndexStack, Writable};

/// Region and time window the keys of one export belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBucket {
    pub region: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ExportBucket {
    pub fn hour(region: impl Into<String>, start: NaiveDateTime) -> Self {
        Self {
            region: region.into(),
            start,
            end: start + Duration::hours(1),
        }
    }

    pub fn day(region: impl Into<String>, date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN);
        Self {
            region: region.into(),
            start,
            end: start + Duration::days(1),
        }
    }

    fn start_seconds(&self) -> u64 {
        self.start.and_utc().timestamp().max(0) as u64
    }

    fn end_seconds(&self) -> u64 {
        self.end.and_utc().timestamp().max(0) as u64
    }
}

/// The `export.bin` file of one batch.
pub struct TemporaryExposureKeyExportFile {
    file: FileOnDisk,
    header: ExportHeader,
    export: TemporaryExposureKeyExport,
}

impl TemporaryExposureKeyExportFile {
    pub fn new(
        name: impl Into<String>,
        header: ExportHeader,
        export: TemporaryExposureKeyExport,
    ) -> Self {
        Self {
            file: FileOnDisk::new(name, Vec::new()),
            header,
            export,
        }
    }

    pub fn export(&self) -> &TemporaryExposureKeyExport {
        &self.export
    }
}

impl Writable for TemporaryExposureKeyExportFile {
    fn name(&self) -> &str {
        self.file.name()
    }

    fn prepare(&mut self, _indices: &IndexStack) -> AssemblyResult<()> {
        self.file.set_bytes(encode_export(&self.header, &self.export))
    }

    fn write_at(&self, path: &Path) -> AssemblyResult<()> {
        self.file.write_at(path)
    }

    fn as_file(&self) -> Option<&dyn File> {
        Some(self)
    }
}

impl File for TemporaryExposureKeyExportFile {
    fn bytes(&self) -> AssemblyResult<Vec<u8>> {
        self.file.bytes()
    }

    fn set_bytes(&mut self, bytes: Vec<u8>) -> AssemblyResult<()> {
        self.file.set_bytes(bytes)
    }
}

/// Produces the `export.sig` signature list of one batch.
///
/// The batch numbers are assigned when the batch is split off and are
/// checked against the export that is actually signed.
pub struct TekSignatureFile {
    file_name: String,
    header: ExportHeader,
    signature_info: SignatureInfo,
    region: String,
    batch_num: i32,
    batch_size: i32,
}

impl TekSignatureFile {
    pub fn new(
        file_name: impl Into<String>,
        header: ExportHeader,
        signature_info: SignatureInfo,
        region: impl Into<String>,
        batch_num: i32,
        batch_size: i32,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            header,
            signature_info,
            region: region.into(),
            batch_num,
            batch_size,
        }
    }

    fn mismatch(&self, reason: impl Into<String>) -> AssemblyError {
        AssemblyError::BatchMismatch {
            region: self.region.clone(),
            batch_num: self.batch_num,
            batch_size: self.batch_size,
            reason: reason.into(),
        }
    }

    fn check_batch(&self, export: &TemporaryExposureKeyExport) -> AssemblyResult<()> {
        if self.batch_num < 1 || self.batch_num > self.batch_size {
            return Err(self.mismatch("batch number outside of batch"));
        }
        if export.batch_num != Some(self.batch_num) {
            return Err(self.mismatch(format!(
                "signed export carries batch number {:?}",
                export.batch_num
            )));
        }
        if export.batch_size != Some(self.batch_size) {
            return Err(self.mismatch(format!(
                "signed export carries batch size {:?}",
                export.batch_size
            )));
        }
        Ok(())
    }
}

impl SignatureFile for TekSignatureFile {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn create(&self, signed: &[u8], signature: Vec<u8>) -> AssemblyResult<Vec<u8>> {
        let export = decode_export(&self.header, signed)?;
        self.check_batch(&export)?;
        let list = TekSignatureList {
            signatures: vec![TekSignature {
                signature_info: Some(self.signature_info.clone()),
                batch_num: Some(self.batch_num),
                batch_size: Some(self.batch_size),
                signature: Some(signature),
            }],
        };
        Ok(list.encode_to_vec())
    }
}

/// Turns the keys of a bucket into signed export archives.
pub struct ExportAssembler {
    header: ExportHeader,
    export_file_name: String,
    output_file_name: String,
    max_keys_per_file: usize,
    signature: SignatureConfig,
    eu_package_name: String,
    normalizer: Arc<dyn KeyNormalizer>,
    crypto: Arc<CryptoProvider>,
}

impl ExportAssembler {
    pub fn new(
        config: &DistributionConfig,
        normalizer: Arc<dyn KeyNormalizer>,
        crypto: Arc<CryptoProvider>,
    ) -> AssemblyResult<Self> {
        let export = &config.tek_export;
        Ok(Self {
            header: ExportHeader::new(export.file_header.clone(), export.file_header_width)?,
            export_file_name: export.file_name.clone(),
            output_file_name: export.output_file_name.clone(),
            max_keys_per_file: export.max_keys_per_file.max(1),
            signature: config.signature.clone(),
            eu_package_name: config.api.eu_package_name.clone(),
            normalizer,
            crypto,
        })
    }

    pub fn header(&self) -> &ExportHeader {
        &self.header
    }

    pub fn export_file_name(&self) -> &str {
        &self.export_file_name
    }

    pub fn signature_info(&self) -> SignatureInfo {
        SignatureInfo {
            verification_key_version: Some(self.signature.verification_key_version.clone()),
            verification_key_id: Some(self.signature.verification_key_id.clone()),
            signature_algorithm: Some(self.crypto.algorithm().oid().to_string()),
        }
    }

    /// Keys of `region` in export form and export order.
    pub fn export_keys(
        &self,
        keys: &[DiagnosisKey],
        region: &str,
    ) -> AssemblyResult<Vec<TemporaryExposureKey>> {
        let mut exported = keys
            .iter()
            .filter(|key| region == self.eu_package_name || key.concerns(region))
            .map(|key| self.to_temporary_exposure_key(key))
            .collect::<AssemblyResult<Vec<_>>>()?;
        order_keys(&mut exported);
        Ok(exported)
    }

    fn to_temporary_exposure_key(&self, key: &DiagnosisKey) -> AssemblyResult<TemporaryExposureKey> {
        let normalized = self
            .normalizer
            .normalize(key.transmission_risk_level(), key.days_since_onset_of_symptoms())?;
        let report_type = match key.report_type() {
            ReportType::Unknown => normalized.report_type.unwrap_or(ReportType::ConfirmedTest),
            own => own,
        };
        let rolling_start_interval_number = signed_field(
            "rolling start interval number",
            key.rolling_start_interval_number(),
        )?;
        let rolling_period = signed_field("rolling period", key.rolling_period())?;
        Ok(TemporaryExposureKey {
            key_data: Some(key.key_data().to_vec()),
            transmission_risk_level: Some(normalized.transmission_risk_level),
            rolling_start_interval_number: Some(rolling_start_interval_number),
            rolling_period: Some(rolling_period),
            report_type: Some(report_type.to_proto() as i32),
            days_since_onset_of_symptoms: Some(normalized.days_since_onset_of_symptoms),
        })
    }

    /// Split ordered keys into batches of at most `max_keys_per_file`.
    pub fn partition(&self, keys: Vec<TemporaryExposureKey>) -> Vec<Vec<TemporaryExposureKey>> {
        let mut batches = Vec::with_capacity(keys.len().div_ceil(self.max_keys_per_file));
        let mut keys = keys.into_iter().peekable();
        while keys.peek().is_some() {
            batches.push(keys.by_ref().take(self.max_keys_per_file).collect());
        }
        batches
    }

    /// One export per batch, numbered from 1.
    pub fn exports(
        &self,
        bucket: &ExportBucket,
        keys: Vec<TemporaryExposureKey>,
    ) -> Vec<TemporaryExposureKeyExport> {
        let batches = self.partition(keys);
        let batch_size = batches.len() as i32;
        batches
            .into_iter()
            .zip(1..)
            .map(|(keys, batch_num)| TemporaryExposureKeyExport {
                start_timestamp: Some(bucket.start_seconds()),
                end_timestamp: Some(bucket.end_seconds()),
                region: Some(bucket.region.clone()),
                batch_num: Some(batch_num),
                batch_size: Some(batch_size),
                signature_infos: vec![self.signature_info()],
                keys,
                revised_keys: Vec::new(),
            })
            .collect()
    }

    /// Signed and checksummed archives for the keys of `bucket`.
    pub fn archives(
        &self,
        bucket: &ExportBucket,
        keys: Vec<TemporaryExposureKey>,
    ) -> AssemblyResult<Vec<Box<dyn Writable>>> {
        let exports = self.exports(bucket, keys);
        debug!(
            region = %bucket.region,
            start = %bucket.start,
            batches = exports.len(),
            "assembling export archives"
        );
        exports
            .into_iter()
            .map(|export| self.archive(bucket, export))
            .collect()
    }

    fn archive(
        &self,
        bucket: &ExportBucket,
        export: TemporaryExposureKeyExport,
    ) -> AssemblyResult<Box<dyn Writable>> {
        let batch_num = export.batch_num.unwrap_or(1);
        let batch_size = export.batch_size.unwrap_or(1);
        let name = if batch_size == 1 {
            self.output_file_name.clone()
        } else {
            format!("{}-{}", self.output_file_name, batch_num)
        };

        let mut archive = ArchiveOnDisk::new(name);
        archive.add_writable(Box::new(TemporaryExposureKeyExportFile::new(
            self.export_file_name.clone(),
            self.header.clone(),
            export,
        )))?;
        let signature_file = TekSignatureFile::new(
            self.signature.file_name.clone(),
            self.header.clone(),
            self.signature_info(),
            bucket.region.clone(),
            batch_num,
            batch_size,
        );
        let signed = ArchiveSigningDecorator::new(archive, self.crypto.clone(), signature_file);
        Ok(Box::new(ChecksumDecorator::new(signed)))
    }
}

fn signed_field(field: &str, value: u32) -> AssemblyResult<i32> {
    i32::try_from(value).map_err(|_| {
        AssemblyError::InvalidKey(KeyValidationError {
            violations: vec![format!("{} {} exceeds {}", field, value, i32::MAX)],
        })
    })
}

/// Order by key data, then rolling start interval.
pub fn order_keys(keys: &mut [TemporaryExposureKey]) {
    keys.sort_by(|a, b| {
        a.key_data
            .cmp(&b.key_data)
            .then(a.rolling_start_interval_number.cmp(&b.rolling_start_interval_number))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistributionConfig;
    use crate::crypto::{generate_private_key, SignatureAlgorithm};
    use crate::structure::archive::unpack;
    use exposure_keys::{DiagnosisKeyBuilder, TransmissionRiskEncoding};
    use proptest::prelude::*;

    fn crypto() -> Arc<CryptoProvider> {
        Arc::new(CryptoProvider::from_material(
            generate_private_key(SignatureAlgorithm::Ed25519),
            vec![0x30, 0x00],
        ))
    }

    fn assembler(max_keys_per_file: usize) -> ExportAssembler {
        let mut config = DistributionConfig::default();
        config.tek_export.max_keys_per_file = max_keys_per_file;
        ExportAssembler::new(&config, Arc::new(TransmissionRiskEncoding::default()), crypto())
            .unwrap()
    }

    fn key(byte: u8, origin: &str, visited: &[&str]) -> DiagnosisKey {
        DiagnosisKeyBuilder::new(vec![byte; 16])
            .transmission_risk_level(6)
            .origin_country(origin)
            .visited_countries(visited.iter().copied())
            .build()
            .unwrap()
    }

    fn tek(byte: u8, rolling_start: i32) -> TemporaryExposureKey {
        TemporaryExposureKey {
            key_data: Some(vec![byte; 16]),
            rolling_start_interval_number: Some(rolling_start),
            ..TemporaryExposureKey::default()
        }
    }

    fn bucket() -> ExportBucket {
        let start = NaiveDate::from_ymd_opt(1970, 1, 2)
            .unwrap()
            .and_hms_opt(5, 0, 0)
            .unwrap();
        ExportBucket::hour("DE", start)
    }

    #[test]
    fn test_bucket_windows() {
        let bucket = bucket();
        assert_eq!(bucket.start_seconds(), 86_400 + 5 * 3_600);
        assert_eq!(bucket.end_seconds(), 86_400 + 6 * 3_600);

        let day = ExportBucket::day("DE", NaiveDate::from_ymd_opt(1970, 1, 2).unwrap());
        assert_eq!(day.end_seconds() - day.start_seconds(), 86_400);
    }

    #[test]
    fn test_export_keys_scoped_to_region() {
        let keys = vec![
            key(1, "DE", &[]),
            key(2, "FR", &["DE"]),
            key(3, "FR", &["FR"]),
        ];
        let assembler = assembler(10);

        let de = assembler.export_keys(&keys, "DE").unwrap();
        assert_eq!(de.len(), 2);
        assert_eq!(assembler.export_keys(&keys, "EUR").unwrap().len(), 3);
        assert!(assembler.export_keys(&keys, "IT").unwrap().is_empty());
    }

    #[test]
    fn test_export_keys_normalized() {
        let keys = vec![key(1, "DE", &[])];
        let exported = assembler(10).export_keys(&keys, "DE").unwrap();

        assert_eq!(exported[0].days_since_onset_of_symptoms, Some(2));
        assert_eq!(exported[0].transmission_risk_level, Some(6));
        assert_eq!(
            exported[0].report_type,
            Some(exposure_protocol::ReportType::ConfirmedTest as i32)
        );
    }

    #[test]
    fn test_unvalidated_rolling_start_beyond_signed_range_rejected() {
        let key: DiagnosisKey = serde_json::from_value(serde_json::json!({
            "key_data": "AQEBAQEBAQEBAQEBAQEBAQ==",
            "rolling_start_interval_number": 3_000_000_000u32,
            "rolling_period": 144,
            "transmission_risk_level": 6,
            "origin_country": "DE",
            "submission_timestamp": 29,
        }))
        .unwrap();

        let err = assembler(10).export_keys(&[key], "DE").unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidKey(_)), "{}", err);
    }

    #[test]
    fn test_order_by_key_data_then_rolling_start() {
        let mut keys = vec![tek(2, 0), tek(1, 7), tek(1, 3)];
        order_keys(&mut keys);
        let order: Vec<_> = keys
            .iter()
            .map(|k| (k.key_data.as_ref().unwrap()[0], k.rolling_start_interval_number.unwrap()))
            .collect();
        assert_eq!(order, vec![(1, 3), (1, 7), (2, 0)]);
    }

    #[test]
    fn test_zero_keys_yield_zero_archives() {
        let archives = assembler(4).archives(&bucket(), Vec::new()).unwrap();
        assert!(archives.is_empty());
    }

    #[test]
    fn test_single_batch_named_after_output_file() {
        let archives = assembler(4).archives(&bucket(), vec![tek(1, 0)]).unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].name(), "index");
    }

    #[test]
    fn test_batches_numbered_from_one() {
        let assembler = assembler(4);
        let keys: Vec<_> = (0..10).map(|i| tek(i, 0)).collect();
        let mut archives = assembler.archives(&bucket(), keys).unwrap();

        let names: Vec<_> = archives.iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["index-1", "index-2", "index-3"]);

        let mut sizes = Vec::new();
        for archive in &mut archives {
            archive.prepare(&IndexStack::new()).unwrap();
            let entries = unpack(&archive.as_file().unwrap().bytes().unwrap()).unwrap();
            assert_eq!(entries[0].0, "export.bin");
            assert_eq!(entries[1].0, "export.sig");

            let export = decode_export(assembler.header(), &entries[0].1).unwrap();
            assert_eq!(export.batch_size, Some(3));
            assert_eq!(export.region.as_deref(), Some("DE"));
            sizes.push(export.keys.len());

            let list = TekSignatureList::decode(entries[1].1.as_slice()).unwrap();
            assert_eq!(list.signatures[0].batch_num, export.batch_num);
            assert_eq!(list.signatures[0].batch_size, Some(3));
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_signature_file_rejects_inconsistent_batch() {
        let assembler = assembler(4);
        let export = TemporaryExposureKeyExport {
            batch_num: Some(2),
            batch_size: Some(3),
            ..TemporaryExposureKeyExport::default()
        };
        let signed = encode_export(assembler.header(), &export);

        let consistent = TekSignatureFile::new(
            "export.sig",
            assembler.header().clone(),
            assembler.signature_info(),
            "DE",
            2,
            3,
        );
        assert!(consistent.create(&signed, vec![1]).is_ok());

        let wrong_num = TekSignatureFile::new(
            "export.sig",
            assembler.header().clone(),
            assembler.signature_info(),
            "DE",
            1,
            3,
        );
        assert!(matches!(
            wrong_num.create(&signed, vec![1]),
            Err(AssemblyError::BatchMismatch { batch_num: 1, .. })
        ));

        let out_of_range = TekSignatureFile::new(
            "export.sig",
            assembler.header().clone(),
            assembler.signature_info(),
            "DE",
            4,
            3,
        );
        assert!(matches!(
            out_of_range.create(&signed, vec![1]),
            Err(AssemblyError::BatchMismatch { .. })
        ));
    }

    #[test]
    fn test_signature_info_follows_config() {
        let info = assembler(4).signature_info();
        assert_eq!(info.verification_key_id.as_deref(), Some("262"));
        assert_eq!(info.verification_key_version.as_deref(), Some("v1"));
        assert_eq!(info.signature_algorithm.as_deref(), Some("1.3.101.112"));
    }

    proptest! {
        #[test]
        fn prop_partition_preserves_order_and_bounds(count in 0usize..60, max in 1usize..12) {
            let assembler = assembler(max);
            let keys: Vec<_> = (0..count).map(|i| tek(i as u8, 0)).collect();
            let batches = assembler.partition(keys.clone());

            prop_assert_eq!(batches.len(), count.div_ceil(max));
            for batch in batches.iter().take(batches.len().saturating_sub(1)) {
                prop_assert_eq!(batch.len(), max);
            }
            if let Some(last) = batches.last() {
                let rest = count % max;
                prop_assert_eq!(last.len(), if rest == 0 { max } else { rest });
            }
            let flattened: Vec<_> = batches.into_iter().flatten().collect();
            prop_assert_eq!(flattened, keys);
        }
    }
}
