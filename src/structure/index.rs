//! Index directory node.

use std::path::Path;
use std::sync::Arc;

use rayon::ThreadPool;
use tracing::debug;

use super::{Directory, DirectoryOnDisk, Index, IndexDirectory, IndexStack, Writable};
use crate::error::AssemblyResult;

/// Derives the index values of a directory from the enclosing stack.
pub type IndexFunction<T> = Box<dyn Fn(&IndexStack) -> AssemblyResult<Vec<T>> + Send + Sync>;

/// Names the subdirectory of an index value.
pub type IndexFormatter<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// Produces the writables placed inside the subdirectory of one index
/// value. The stack passed in has that value on top.
pub type WritableFunction =
    Box<dyn Fn(&IndexStack) -> AssemblyResult<Vec<Box<dyn Writable>>> + Send + Sync>;

/// A directory with one subdirectory per value of its index.
///
/// Static children added with [`Directory::add_writable`] are kept across
/// `prepare` calls; derived subdirectories are rebuilt on every call.
pub struct IndexDirectoryOnDisk<T> {
    directory: DirectoryOnDisk,
    index_function: IndexFunction<T>,
    formatter: IndexFormatter<T>,
    writable_functions: Vec<WritableFunction>,
    derived: Vec<String>,
}

impl<T> IndexDirectoryOnDisk<T>
where
    T: Clone + Into<Index> + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        index_function: impl Fn(&IndexStack) -> AssemblyResult<Vec<T>> + Send + Sync + 'static,
        formatter: impl Fn(&T) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            directory: DirectoryOnDisk::new(name),
            index_function: Box::new(index_function),
            formatter: Box::new(formatter),
            writable_functions: Vec::new(),
            derived: Vec::new(),
        }
    }

    /// Register a function applied to every derived index value.
    pub fn add_writable_to_all(
        &mut self,
        function: impl Fn(&IndexStack) -> AssemblyResult<Vec<Box<dyn Writable>>>
            + Send
            + Sync
            + 'static,
    ) {
        self.writable_functions.push(Box::new(function));
    }

    /// Write the derived subdirectories concurrently on `pool`.
    pub fn with_write_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.directory.set_write_pool(Some(pool));
        self
    }

    fn build_child(&self, value: &T, indices: &IndexStack) -> AssemblyResult<DirectoryOnDisk> {
        let pushed = indices.push(value.clone());
        let mut child = DirectoryOnDisk::new((self.formatter)(value));
        for function in &self.writable_functions {
            for writable in function(&pushed)? {
                child.add_writable(writable)?;
            }
        }
        child.prepare(&pushed)?;
        Ok(child)
    }
}

impl<T> Writable for IndexDirectoryOnDisk<T>
where
    T: Clone + Into<Index> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.directory.name()
    }

    fn prepare(&mut self, indices: &IndexStack) -> AssemblyResult<()> {
        for name in std::mem::take(&mut self.derived) {
            self.directory.remove_writable(&name);
        }
        self.directory.prepare(indices)?;

        let values = self.index(indices)?;
        debug!(directory = self.name(), values = values.len(), "derived index");

        for value in &values {
            let child = self.build_child(value, indices)?;
            self.derived.push(child.name().to_string());
            self.directory.add_writable(Box::new(child))?;
        }
        Ok(())
    }

    fn write_at(&self, path: &Path) -> AssemblyResult<()> {
        self.directory.write_at(path)
    }

    fn as_directory(&self) -> Option<&dyn Directory> {
        Some(self)
    }

    fn as_directory_mut(&mut self) -> Option<&mut dyn Directory> {
        Some(self)
    }
}

impl<T> Directory for IndexDirectoryOnDisk<T>
where
    T: Clone + Into<Index> + Send + Sync + 'static,
{
    fn add_writable(&mut self, writable: Box<dyn Writable>) -> AssemblyResult<()> {
        self.directory.add_writable(writable)
    }

    fn remove_writable(&mut self, name: &str) -> Option<Box<dyn Writable>> {
        self.directory.remove_writable(name)
    }

    fn writables(&self) -> &[Box<dyn Writable>] {
        self.directory.writables()
    }

    fn writable_mut(&mut self, name: &str) -> Option<&mut (dyn Writable + 'static)> {
        self.directory.writable_mut(name)
    }
}

impl<T> IndexDirectory<T> for IndexDirectoryOnDisk<T>
where
    T: Clone + Into<Index> + Send + Sync + 'static,
{
    fn index(&self, indices: &IndexStack) -> AssemblyResult<Vec<T>> {
        (self.index_function)(indices)
    }

    fn format(&self, value: &T) -> String {
        (self.formatter)(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssemblyError;
    use crate::structure::FileOnDisk;
    use std::fs;
    use tempfile::TempDir;

    fn countries(_: &IndexStack) -> AssemblyResult<Vec<String>> {
        Ok(vec!["DE".to_string(), "FR".to_string()])
    }

    fn region_file(indices: &IndexStack) -> AssemblyResult<Vec<Box<dyn Writable>>> {
        let region = indices.nearest_text().unwrap_or_default().to_string();
        Ok(vec![Box::new(FileOnDisk::new("region", region.into_bytes()))])
    }

    #[test]
    fn test_one_subdirectory_per_value() {
        let dir = TempDir::new().unwrap();
        let mut country = IndexDirectoryOnDisk::new("country", countries, |c: &String| c.clone());
        country.add_writable_to_all(region_file);

        country.prepare(&IndexStack::new()).unwrap();
        country.write(dir.path()).unwrap();

        assert_eq!(fs::read(dir.path().join("country/DE/region")).unwrap(), b"DE");
        assert_eq!(fs::read(dir.path().join("country/FR/region")).unwrap(), b"FR");
    }

    fn hour_directory() -> IndexDirectoryOnDisk<i64> {
        IndexDirectoryOnDisk::new(
            "hour",
            |indices: &IndexStack| {
                let region = indices.nearest_text().unwrap_or_default();
                Ok(if region == "DE" { vec![1i64, 2] } else { vec![3i64] })
            },
            |h: &i64| h.to_string(),
        )
    }

    #[test]
    fn test_nested_index_sees_parent_values() {
        let mut country = IndexDirectoryOnDisk::new("country", countries, |c: &String| c.clone());
        country.add_writable_to_all(|_| Ok(vec![Box::new(hour_directory()) as Box<dyn Writable>]));

        country.prepare(&IndexStack::new()).unwrap();

        let de = country.writable("DE").unwrap().as_directory().unwrap();
        let de_hours = de.writable("hour").unwrap().as_directory().unwrap();
        let names: Vec<&str> = de_hours.writables().iter().map(|w| w.name()).collect();
        assert_eq!(names, vec!["1", "2"]);

        let fr = country.writable("FR").unwrap().as_directory().unwrap();
        let fr_hours = fr.writable("hour").unwrap().as_directory().unwrap();
        assert_eq!(fr_hours.writables().len(), 1);
    }

    #[test]
    fn test_empty_index_creates_no_children() {
        let mut dir = IndexDirectoryOnDisk::new(
            "date",
            |_: &IndexStack| Ok(Vec::<String>::new()),
            |v: &String| v.clone(),
        );
        dir.prepare(&IndexStack::new()).unwrap();
        assert!(dir.writables().is_empty());
    }

    #[test]
    fn test_prepare_twice_rebuilds_children() {
        let mut country = IndexDirectoryOnDisk::new("country", countries, |c: &String| c.clone());
        country
            .add_writable(Box::new(FileOnDisk::new("static", Vec::new())))
            .unwrap();

        country.prepare(&IndexStack::new()).unwrap();
        country.prepare(&IndexStack::new()).unwrap();

        let names: Vec<&str> = country.writables().iter().map(|w| w.name()).collect();
        assert_eq!(names, vec!["static", "DE", "FR"]);
    }

    #[test]
    fn test_index_failure_surfaces() {
        let mut dir = IndexDirectoryOnDisk::<String>::new(
            "date",
            |_: &IndexStack| Err(AssemblyError::index("date", "source unavailable")),
            |v: &String| v.clone(),
        );
        let err = dir.prepare(&IndexStack::new()).unwrap_err();
        assert!(matches!(err, AssemblyError::Index { .. }));
    }
}
