use std::{fs::File, io::BufWriter, path::Path};

use anyhow::{Context, Result};
use strum::Display;
use url::Url;

use crate::aggregator::Aggregation;

mod html_format;
mod json_format;

/// Output formats for the access report.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ReportOutputFormat {
    Html,
    Json,
}

/// A trait for things that can be output as a document.
pub trait Reportable {
    type Format;
    fn report<W: std::io::Write>(&self, format: Self::Format, writer: W) -> Result<()>;
}

/// Renders a finished [`Aggregation`] for one GitLab server.
pub struct AccessReporter<'a> {
    pub server_url: &'a Url,
    pub aggregation: &'a Aggregation,
}

impl<'a> AccessReporter<'a> {
    pub fn new(server_url: &'a Url, aggregation: &'a Aggregation) -> Self {
        Self { server_url, aggregation }
    }

    /// Write the report to `path`, creating or truncating the file.
    pub fn write_to_path(&self, format: ReportOutputFormat, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {format} report at {}", path.display()))?;
        self.report(format, BufWriter::new(file))
    }
}

impl Reportable for AccessReporter<'_> {
    type Format = ReportOutputFormat;

    fn report<W: std::io::Write>(&self, format: Self::Format, writer: W) -> Result<()> {
        match format {
            ReportOutputFormat::Html => self.html_format(writer),
            ReportOutputFormat::Json => self.json_format(writer),
        }
    }
}
