//! Result reporters.

pub mod json;
pub mod tap;

use crate::runner::RunReport;

pub use json::JsonReporter;
pub use tap::TapReporter;

/// Serializes a finished run.
pub trait Reporter {
    fn render(&self, report: &RunReport) -> String;
}

/// Output format selectable on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Tap,
    Json,
}

impl ReportFormat {
    #[must_use]
    pub fn reporter(self, verbose: bool) -> Box<dyn Reporter> {
        match self {
            Self::Tap => Box::new(TapReporter { verbose }),
            Self::Json => Box::new(JsonReporter { verbose }),
        }
    }
}
