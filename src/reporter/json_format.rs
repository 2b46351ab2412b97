use serde::Serialize;

use super::*;
use crate::{aggregator::FetchFailure, model::AccessIndex};

#[derive(Serialize)]
struct JsonReport<'a> {
    server: &'a str,
    complete: bool,
    repositories: usize,
    users: &'a AccessIndex,
    failures: &'a [FetchFailure],
}

impl AccessReporter<'_> {
    pub fn json_format<W: std::io::Write>(&self, mut writer: W) -> Result<()> {
        let report = JsonReport {
            server: self.server_url.as_str(),
            complete: self.aggregation.is_complete(),
            repositories: self.aggregation.total,
            users: &self.aggregation.index,
            failures: &self.aggregation.failures,
        };
        serde_json::to_writer_pretty(&mut writer, &report)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}
