//! Signing decorators.

use std::path::Path;
use std::sync::Arc;

use exposure_protocol::SignedPayload;
use prost::Message;
use tracing::debug;

use crate::crypto::CryptoProvider;
use crate::error::{AssemblyError, AssemblyResult};
use crate::structure::{Archive, Directory, File, FileOnDisk, IndexStack, Writable};

/// Builds the signature file stored inside a signed archive.
pub trait SignatureFile: Send + Sync {
    fn file_name(&self) -> &str;

    /// Content of the signature file for `signed` and its `signature`.
    fn create(&self, signed: &[u8], signature: Vec<u8>) -> AssemblyResult<Vec<u8>>;
}

/// Replaces the bytes of a file with a [`SignedPayload`] envelope.
///
/// The unsigned payload is kept so that preparing again signs the
/// unsigned content rather than the previous envelope.
pub struct SigningDecorator<F> {
    inner: F,
    crypto: Arc<CryptoProvider>,
    unsigned: Option<Vec<u8>>,
}

impl<F: File> SigningDecorator<F> {
    pub fn new(inner: F, crypto: Arc<CryptoProvider>) -> Self {
        Self {
            inner,
            crypto,
            unsigned: None,
        }
    }
}

impl<F: File> Writable for SigningDecorator<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn prepare(&mut self, indices: &IndexStack) -> AssemblyResult<()> {
        if let Some(unsigned) = self.unsigned.take() {
            self.inner.set_bytes(unsigned)?;
        }
        self.inner.prepare(indices)?;

        let payload = self.inner.bytes()?;
        let envelope = SignedPayload {
            certificate_chain: Some(self.crypto.certificate()?.to_vec()),
            signature: Some(self.crypto.sign(&payload)?),
            payload: Some(payload.clone()),
        };
        debug!(file = self.name(), bytes = payload.len(), "signed payload");
        self.inner.set_bytes(envelope.encode_to_vec())?;
        self.unsigned = Some(payload);
        Ok(())
    }

    fn write_at(&self, path: &Path) -> AssemblyResult<()> {
        self.inner.write_at(path)
    }

    fn as_file(&self) -> Option<&dyn File> {
        Some(self)
    }
}

impl<F: File> File for SigningDecorator<F> {
    fn bytes(&self) -> AssemblyResult<Vec<u8>> {
        self.inner.bytes()
    }

    fn set_bytes(&mut self, bytes: Vec<u8>) -> AssemblyResult<()> {
        self.unsigned = None;
        self.inner.set_bytes(bytes)
    }

    fn bytes_for_checksum(&self) -> AssemblyResult<Vec<u8>> {
        self.inner.bytes_for_checksum()
    }
}

/// Signs the single file staged in an archive and stores the signature
/// file produced by `S` next to it.
pub struct ArchiveSigningDecorator<A, S> {
    inner: A,
    crypto: Arc<CryptoProvider>,
    signature_file: S,
}

impl<A: Archive, S: SignatureFile> ArchiveSigningDecorator<A, S> {
    pub fn new(inner: A, crypto: Arc<CryptoProvider>, signature_file: S) -> Self {
        Self {
            inner,
            crypto,
            signature_file,
        }
    }

    fn bytes_to_sign(&self) -> AssemblyResult<Vec<u8>> {
        let files = self.inner.files();
        match files.as_slice() {
            [file] => file.bytes(),
            _ => Err(AssemblyError::UnexpectedFileCount {
                archive: self.name().to_string(),
                found: files.len(),
            }),
        }
    }
}

impl<A: Archive, S: SignatureFile> Writable for ArchiveSigningDecorator<A, S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn prepare(&mut self, indices: &IndexStack) -> AssemblyResult<()> {
        self.inner.remove_writable(self.signature_file.file_name());
        self.inner.prepare(indices)?;

        let signed = self.bytes_to_sign()?;
        let signature = self.crypto.sign(&signed)?;
        let content = self.signature_file.create(&signed, signature)?;
        self.inner.add_writable(Box::new(FileOnDisk::new(
            self.signature_file.file_name(),
            content,
        )))
    }

    fn write_at(&self, path: &Path) -> AssemblyResult<()> {
        self.inner.write_at(path)
    }

    fn as_file(&self) -> Option<&dyn File> {
        Some(self)
    }

    fn as_directory(&self) -> Option<&dyn Directory> {
        Some(self)
    }

    fn as_directory_mut(&mut self) -> Option<&mut dyn Directory> {
        Some(self)
    }
}

impl<A: Archive, S: SignatureFile> File for ArchiveSigningDecorator<A, S> {
    fn bytes(&self) -> AssemblyResult<Vec<u8>> {
        self.inner.bytes()
    }

    fn set_bytes(&mut self, bytes: Vec<u8>) -> AssemblyResult<()> {
        self.inner.set_bytes(bytes)
    }

    fn bytes_for_checksum(&self) -> AssemblyResult<Vec<u8>> {
        self.inner.bytes_for_checksum()
    }
}

impl<A: Archive, S: SignatureFile> Directory for ArchiveSigningDecorator<A, S> {
    fn add_writable(&mut self, writable: Box<dyn Writable>) -> AssemblyResult<()> {
        self.inner.add_writable(writable)
    }

    fn remove_writable(&mut self, name: &str) -> Option<Box<dyn Writable>> {
        self.inner.remove_writable(name)
    }

    fn writables(&self) -> &[Box<dyn Writable>] {
        self.inner.writables()
    }

    fn writable_mut(&mut self, name: &str) -> Option<&mut (dyn Writable + 'static)> {
        self.inner.writable_mut(name)
    }
}

impl<A: Archive, S: SignatureFile> Archive for ArchiveSigningDecorator<A, S> {}
