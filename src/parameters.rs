//! The `parameters` subtree: the signed app configuration of the origin
//! country.

use std::sync::Arc;

use crate::config::DistributionConfig;
use crate::crypto::CryptoProvider;
use crate::structure::decorator::{ChecksumDecorator, IndexingDecorator, SigningDecorator};
use crate::structure::{FileOnDisk, IndexDirectoryOnDisk, IndexStack, Writable};

/// `parameters/index` listing the origin country, and
/// `parameters/<country>/index` holding `payload` in a signed envelope.
pub fn parameters_directory(
    config: &DistributionConfig,
    crypto: Arc<CryptoProvider>,
    payload: Vec<u8>,
) -> impl Writable {
    let api = &config.api;
    let origin_country = api.origin_country.clone();
    let mut parameters = IndexDirectoryOnDisk::new(
        api.parameters_path.clone(),
        move |_: &IndexStack| Ok(vec![origin_country.clone()]),
        |country: &String| country.clone(),
    );

    let payload = Arc::new(payload);
    let file_name = api.index_file_name.clone();
    parameters.add_writable_to_all(move |_: &IndexStack| {
        let file = FileOnDisk::new(file_name.clone(), payload.as_ref().clone());
        let signed = SigningDecorator::new(file, crypto.clone());
        Ok(vec![Box::new(ChecksumDecorator::new(signed)) as Box<dyn Writable>])
    });

    IndexingDecorator::new(parameters, api.index_file_name.clone())
}
