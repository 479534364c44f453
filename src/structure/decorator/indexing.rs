//! `index` files listing the values of an index directory.

use std::marker::PhantomData;
use std::path::Path;

use serde_json::Value;

use crate::error::AssemblyResult;
use crate::structure::{Directory, FileOnDisk, IndexDirectory, IndexStack, Writable};

type ValueFormatter<T> = Box<dyn Fn(&T) -> Value + Send + Sync>;

/// Adds a JSON array of all derived index values to an index directory.
///
/// Values are listed as the directory names by default. A different
/// formatter can be set, e.g. to list hours as numbers.
pub struct IndexingDecorator<T, D> {
    inner: D,
    file_name: String,
    index_formatter: Option<ValueFormatter<T>>,
    _values: PhantomData<fn() -> T>,
}

impl<T, D> IndexingDecorator<T, D>
where
    D: IndexDirectory<T>,
{
    pub fn new(inner: D, file_name: impl Into<String>) -> Self {
        Self {
            inner,
            file_name: file_name.into(),
            index_formatter: None,
            _values: PhantomData,
        }
    }

    pub fn with_index_formatter(
        mut self,
        formatter: impl Fn(&T) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.index_formatter = Some(Box::new(formatter));
        self
    }

    fn index_bytes(&self, values: &[T]) -> AssemblyResult<Vec<u8>> {
        let listed: Vec<Value> = values
            .iter()
            .map(|value| match &self.index_formatter {
                Some(formatter) => formatter(value),
                None => Value::String(self.inner.format(value)),
            })
            .collect();
        Ok(serde_json::to_vec(&listed)?)
    }
}

impl<T, D> Writable for IndexingDecorator<T, D>
where
    D: IndexDirectory<T>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn prepare(&mut self, indices: &IndexStack) -> AssemblyResult<()> {
        self.inner.remove_writable(&self.file_name);
        self.inner.prepare(indices)?;
        let values = self.inner.index(indices)?;
        let bytes = self.index_bytes(&values)?;
        self.inner
            .add_writable(Box::new(FileOnDisk::new(self.file_name.clone(), bytes)))
    }

    fn write_at(&self, path: &Path) -> AssemblyResult<()> {
        self.inner.write_at(path)
    }

    fn as_directory(&self) -> Option<&dyn Directory> {
        Some(self)
    }

    fn as_directory_mut(&mut self) -> Option<&mut dyn Directory> {
        Some(self)
    }
}

impl<T, D> Directory for IndexingDecorator<T, D>
where
    D: IndexDirectory<T>,
{
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

impl<T, D> IndexDirectory<T> for IndexingDecorator<T, D>
where
    D: IndexDirectory<T>,
{
    fn index(&self, indices: &IndexStack) -> AssemblyResult<Vec<T>> {
        self.inner.index(indices)
    }

    fn format(&self, value: &T) -> String {
        self.inner.format(value)
    }
}
