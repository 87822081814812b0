//! CSV exports for the admin dashboard. Figures are computed from the store
//! at export time.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::error::Result;
use crate::models::{AssignmentStatus, VerificationStatus};
use crate::storage::Storage;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Financial,
    Collection,
    System,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Financial => "financial",
            ReportKind::Collection => "collection",
            ReportKind::System => "system",
        }
    }

    fn header(&self) -> &'static str {
        match self {
            ReportKind::Financial => "Date,Revenue,Expenses,Profit",
            ReportKind::Collection => "Date,Collections,Weight,Efficiency",
            ReportKind::System => "Date,Routes,Completed,Avg Efficiency",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "financial" => Ok(ReportKind::Financial),
            "collection" => Ok(ReportKind::Collection),
            "system" => Ok(ReportKind::System),
            other => Err(format!("unknown report type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub filename: String,
    pub content: String,
}

pub fn filename(kind: ReportKind, date: NaiveDate) -> String {
    format!("{}-report-{}.csv", kind, date.format("%Y-%m-%d"))
}

fn average_efficiency(storage: &Storage) -> Result<f64> {
    let routes = storage.routes()?;
    if routes.is_empty() {
        return Ok(0.0);
    }
    Ok(routes.iter().map(|r| f64::from(r.efficiency)).sum::<f64>() / routes.len() as f64)
}

/// One header row plus one data row for `date`.
pub fn generate(storage: &Storage, kind: ReportKind, date: NaiveDate, platform_margin: f64) -> Result<Report> {
    let day = date.format("%Y-%m-%d");
    let row = match kind {
        ReportKind::Financial => {
            let payouts: f64 = storage
                .assignments()?
                .iter()
                .filter(|a| a.status == AssignmentStatus::Completed)
                .map(|a| a.earnings)
                .sum();
            let revenue = payouts * (1.0 + platform_margin);
            format!("{day},${revenue:.2},${payouts:.2},${:.2}", revenue - payouts)
        }
        ReportKind::Collection => {
            let verified: Vec<_> = storage
                .records()?
                .into_iter()
                .filter(|r| r.verification_status == VerificationStatus::Verified)
                .collect();
            let weight: f64 = verified.iter().map(|r| r.weight).sum();
            format!(
                "{day},{},{weight:.1} kg,{:.0}%",
                verified.len(),
                average_efficiency(storage)?
            )
        }
        ReportKind::System => {
            let routes = storage.routes()?.len();
            let completed = storage
                .assignments()?
                .iter()
                .filter(|a| a.status == AssignmentStatus::Completed)
                .count();
            format!("{day},{routes},{completed},{:.0}%", average_efficiency(storage)?)
        }
    };

    let report = Report {
        filename: filename(kind, date),
        content: format!("{}\n{}\n", kind.header(), row),
    };
    info!(report = %report.filename, "report generated");
    Ok(report)
}
