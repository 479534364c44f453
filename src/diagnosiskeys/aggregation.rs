//! Day aggregates built from the hour archives of a date directory.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use exposure_protocol::{decode_export, TemporaryExposureKey};
use tracing::{debug, info};

use super::export::{order_keys, ExportAssembler, ExportBucket};
use crate::error::{AssemblyError, AssemblyResult};
use crate::structure::{Directory, IndexDirectory, IndexStack, Writable};

/// Adds one set of day archives to every date subdirectory.
///
/// The day archives carry the keys of every hour of that day that has
/// completed at the distribution time. The hour still accumulating keys is
/// left out, so a day aggregate never publishes keys ahead of its hours.
pub struct DateAggregatingDecorator<D> {
    inner: D,
    assembler: Arc<ExportAssembler>,
    hour_path: String,
    distribution_time: NaiveDateTime,
    include_incomplete_days: bool,
}

impl<D> DateAggregatingDecorator<D>
where
    D: IndexDirectory<NaiveDate>,
{
    pub fn new(
        inner: D,
        assembler: Arc<ExportAssembler>,
        hour_path: impl Into<String>,
        distribution_time: NaiveDateTime,
        include_incomplete_days: bool,
    ) -> Self {
        Self {
            inner,
            assembler,
            hour_path: hour_path.into(),
            distribution_time,
            include_incomplete_days,
        }
    }

    fn is_aggregated(&self, date: NaiveDate) -> bool {
        self.include_incomplete_days || date < self.distribution_time.date()
    }

    /// Keys of every completed hour below `day`, in hour order.
    fn completed_hour_keys(
        &self,
        day: &dyn Directory,
        date: NaiveDate,
    ) -> AssemblyResult<Vec<TemporaryExposureKey>> {
        let Some(hours) = day.writable(&self.hour_path).and_then(|w| w.as_directory()) else {
            return Ok(Vec::new());
        };

        let mut keys = Vec::new();
        for hour in hours.writables().iter().filter(|w| w.is_directory() && !w.is_file()) {
            let Ok(h) = hour.name().parse::<u32>() else {
                continue;
            };
            let Some(start) = NaiveTime::from_hms_opt(h, 0, 0).map(|t| date.and_time(t)) else {
                continue;
            };
            if start + Duration::hours(1) > self.distribution_time {
                debug!(%start, "skipping incomplete hour");
                continue;
            }
            if let Some(hour) = hour.as_directory() {
                keys.extend(self.archive_keys(hour)?);
            }
        }
        Ok(keys)
    }

    fn archive_keys(&self, hour: &dyn Directory) -> AssemblyResult<Vec<TemporaryExposureKey>> {
        let mut keys = Vec::new();
        for archive in hour.writables().iter().filter(|w| w.is_archive()) {
            let export = archive
                .as_directory()
                .and_then(|staging| staging.writable(self.assembler.export_file_name()))
                .and_then(|file| file.as_file())
                .ok_or_else(|| {
                    AssemblyError::index(
                        archive.name(),
                        format!("archive has no {}", self.assembler.export_file_name()),
                    )
                })?;
            let export = decode_export(self.assembler.header(), &export.bytes()?)?;
            keys.extend(export.keys);
        }
        Ok(keys)
    }
}

impl<D> Writable for DateAggregatingDecorator<D>
where
    D: IndexDirectory<NaiveDate>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn prepare(&mut self, indices: &IndexStack) -> AssemblyResult<()> {
        self.inner.prepare(indices)?;
        let region = indices
            .nearest_text()
            .ok_or_else(|| AssemblyError::index(self.inner.name(), "no region on index stack"))?
            .to_string();

        for date in self.inner.index(indices)? {
            if !self.is_aggregated(date) {
                debug!(%date, region = %region, "skipping incomplete day");
                continue;
            }
            let name = self.inner.format(&date);
            let mut keys = match self.inner.writable(&name).and_then(|w| w.as_directory()) {
                Some(day) => self.completed_hour_keys(day, date)?,
                None => continue,
            };
            if keys.is_empty() {
                continue;
            }
            order_keys(&mut keys);
            info!(%date, region = %region, keys = keys.len(), "aggregating day");

            let day_indices = indices.push(date);
            let mut archives = self
                .assembler
                .archives(&ExportBucket::day(region.clone(), date), keys)?;
            for archive in &mut archives {
                archive.prepare(&day_indices)?;
            }
            let day = self
                .inner
                .writable_mut(&name)
                .and_then(|w| w.as_directory_mut())
                .ok_or_else(|| AssemblyError::index(name.clone(), "date directory vanished"))?;
            for archive in archives {
                day.add_writable(archive)?;
            }
        }
        Ok(())
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

impl<D> Directory for DateAggregatingDecorator<D>
where
    D: IndexDirectory<NaiveDate>,
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

impl<D> IndexDirectory<NaiveDate> for DateAggregatingDecorator<D>
where
    D: IndexDirectory<NaiveDate>,
{
    fn index(&self, indices: &IndexStack) -> AssemblyResult<Vec<NaiveDate>> {
        self.inner.index(indices)
    }

    fn format(&self, value: &NaiveDate) -> String {
        self.inner.format(value)
    }
}
