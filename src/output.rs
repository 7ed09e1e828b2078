use std::io::{self, Write};

use serde::Serialize;

use crate::app::{AssetAction, MaterializeReport};
use crate::domain::{Account, MergedTrajectory};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequencesSummary {
    pub username: String,
    pub account_key: String,
    pub format: String,
    pub fragments: Option<usize>,
    pub bytes: usize,
    pub saved_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeSummary {
    pub username: String,
    pub images: usize,
    pub first_image: Option<String>,
    pub last_image: Option<String>,
    pub saved_to: Option<String>,
}

impl MergeSummary {
    pub fn new(username: &str, merged: &MergedTrajectory, saved_to: Option<String>) -> Self {
        Self {
            username: username.to_string(),
            images: merged.len(),
            first_image: merged.image_keys.first().cloned(),
            last_image: merged.image_keys.last().cloned(),
            saved_to,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_account(account: &Account) -> io::Result<()> {
        Self::print_json(account)
    }

    pub fn print_sequences(summary: &SequencesSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_merge(summary: &MergeSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_assets(report: &MaterializeReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_sequences(summary: &SequencesSummary) {
        println!(
            "{} ({}): {} sequences, {} bytes",
            summary.username, summary.account_key, summary.format, summary.bytes
        );
        if let Some(fragments) = summary.fragments {
            println!("  fragments: {fragments}");
        }
        if let Some(path) = &summary.saved_to {
            println!("  saved to: {path}");
        }
    }

    pub fn print_merge(summary: &MergeSummary) {
        println!("{}: {} images", summary.username, summary.images);
        if let (Some(first), Some(last)) = (&summary.first_image, &summary.last_image) {
            println!("  from {first} to {last}");
        }
        if let Some(path) = &summary.saved_to {
            println!("  saved to: {path}");
        }
    }

    pub fn print_assets(report: &MaterializeReport) {
        println!(
            "images: {} downloaded, {} already present, {} failed",
            report.count(AssetAction::Downloaded),
            report.count(AssetAction::Skipped),
            report.count(AssetAction::Failed)
        );
        for item in &report.items {
            if let Some(error) = &item.error {
                println!("  {}: {error}", item.key);
            }
        }
    }
}
