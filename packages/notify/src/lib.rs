#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Summary email rendering and delivery.
//!
//! [`render_summary_email`] turns a [`CollisionSummary`] into a plain-text
//! [`EmailMessage`]. Delivery goes through the [`Mailer`] trait; this crate
//! ships an outbox writer for an external relay and a log-only mailer; it
//! does not speak SMTP itself.

pub mod mailer;

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use collision_digest_summary::CollisionSummary;

pub use mailer::{LogMailer, Mailer, OutboxMailer};

/// Default subject prefix; the run date is appended.
pub const DEFAULT_SUBJECT_PREFIX: &str = "NYC Collision Summary";

/// Default sender address.
pub const DEFAULT_FROM: &str = "collision-digest@localhost";

/// Errors that can occur while delivering a message.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The message has no recipients.
    #[error("email has no recipients")]
    NoRecipients,

    /// File system operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Sender, recipients, and subject for summary emails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    /// `From` address.
    pub from: String,
    /// `To` addresses.
    pub to: Vec<String>,
    /// Subject text placed before the run date.
    pub subject_prefix: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from: DEFAULT_FROM.to_string(),
            to: Vec::new(),
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
        }
    }
}

/// A rendered plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// `From` address.
    pub from: String,
    /// `To` addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Time the message was composed.
    pub date: DateTime<FixedOffset>,
    /// Plain-text body, `\n` line endings.
    pub body: String,
}

impl EmailMessage {
    /// Formats the message as an RFC 5322 document with CRLF line endings.
    #[must_use]
    pub fn to_rfc5322(&self) -> String {
        let mut out = String::new();
        let mut header = |name: &str, value: &str| {
            let _ = write!(out, "{name}: {}\r\n", single_line(value));
        };

        header("From", &self.from);
        header("To", &self.to.join(", "));
        header("Subject", &self.subject);
        header("Date", &self.date.to_rfc2822());
        header("MIME-Version", "1.0");
        header("Content-Type", "text/plain; charset=utf-8");
        header("Content-Transfer-Encoding", "8bit");

        out.push_str("\r\n");
        for line in self.body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }
}

/// Header values cannot span lines.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Renders the summary email for a run composed at `now`.
#[must_use]
pub fn render_summary_email(
    summary: &CollisionSummary,
    config: &EmailConfig,
    now: DateTime<FixedOffset>,
) -> EmailMessage {
    let run_date = now.format("%Y-%m-%d");
    let subject = format!("{} - {run_date}", config.subject_prefix.trim());

    let mut body = String::new();
    let _ = writeln!(body, "Collision summary for {run_date}");
    body.push('\n');
    let _ = writeln!(body, "Records retrieved: {}", summary.record_count);

    let range = summary.date_range;
    match (range.earliest, range.latest) {
        (Some(earliest), Some(latest)) => {
            let _ = writeln!(body, "Date range: {earliest} to {latest}");
        }
        _ => body.push_str("Date range: n/a\n"),
    }

    let _ = writeln!(body, "Persons injured: {}", summary.total_injured);
    let _ = writeln!(body, "Persons killed: {}", summary.total_killed);

    body.push_str("\nCollisions by borough:\n");
    let boroughs = summary.boroughs_by_count();
    if boroughs.is_empty() {
        body.push_str("  (none reported)\n");
    }
    for (borough, count) in boroughs {
        let _ = writeln!(body, "  {borough}: {count}");
    }

    if let Some(districts) = summary.districts_by_count() {
        body.push_str("\nCollisions by district:\n");
        for (district, count) in districts {
            let _ = writeln!(body, "  {district}: {count}");
        }
    }

    EmailMessage {
        from: config.from.clone(),
        to: config.to.clone(),
        subject,
        date: now,
        body,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{NaiveDate, TimeZone};
    use collision_digest_summary::DateRange;

    use super::*;

    pub fn now() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 6, 7, 30, 0)
            .unwrap()
    }

    pub fn summary() -> CollisionSummary {
        CollisionSummary {
            record_count: 5,
            date_range: DateRange {
                earliest: NaiveDate::from_ymd_opt(2024, 2, 28),
                latest: NaiveDate::from_ymd_opt(2024, 3, 5),
            },
            total_injured: 4,
            total_killed: 1,
            boroughs: BTreeMap::from([
                ("BRONX".to_string(), 1),
                ("BROOKLYN".to_string(), 3),
                ("QUEENS".to_string(), 1),
            ]),
            districts: None,
        }
    }

    fn config() -> EmailConfig {
        EmailConfig {
            to: vec!["ops@example.org".to_string()],
            ..EmailConfig::default()
        }
    }

    #[test]
    fn renders_subject_and_totals() {
        let message = render_summary_email(&summary(), &config(), now());

        assert_eq!(message.subject, "NYC Collision Summary - 2024-03-06");
        assert_eq!(message.from, DEFAULT_FROM);
        assert!(message.body.contains("Records retrieved: 5\n"));
        assert!(message.body.contains("Date range: 2024-02-28 to 2024-03-05\n"));
        assert!(message.body.contains("Persons injured: 4\n"));
        assert!(message.body.contains("Persons killed: 1\n"));
        assert!(!message.body.contains("by district"));
    }

    #[test]
    fn lists_boroughs_by_descending_count() {
        let message = render_summary_email(&summary(), &config(), now());
        let boroughs: Vec<&str> = message
            .body
            .lines()
            .skip_while(|l| !l.starts_with("Collisions by borough"))
            .skip(1)
            .take_while(|l| !l.is_empty())
            .collect();

        assert_eq!(boroughs, ["  BROOKLYN: 3", "  BRONX: 1", "  QUEENS: 1"]);
    }

    #[test]
    fn includes_district_breakdown_when_present() {
        let mut summary = summary();
        summary.districts = Some(BTreeMap::from([
            ("District 2".to_string(), 4),
            ("Unassigned".to_string(), 1),
        ]));

        let message = render_summary_email(&summary, &config(), now());

        assert!(
            message
                .body
                .contains("Collisions by district:\n  District 2: 4\n  Unassigned: 1\n")
        );
    }

    #[test]
    fn handles_empty_summary() {
        let message = render_summary_email(&CollisionSummary::default(), &config(), now());
        assert!(message.body.contains("Date range: n/a\n"));
        assert!(message.body.contains("(none reported)"));
    }

    #[test]
    fn formats_rfc5322_document() {
        let mut config = config();
        config.to.push("desk@example.org".to_string());
        config.subject_prefix = "Daily\r\nBcc: evil@example.org".to_string();

        let text = render_summary_email(&summary(), &config, now()).to_rfc5322();
        let (headers, body) = text.split_once("\r\n\r\n").unwrap();

        assert!(headers.contains("To: ops@example.org, desk@example.org\r\n"));
        assert!(headers.contains("Date: Wed, 6 Mar 2024 07:30:00 -0500\r\n"));
        assert!(headers.contains("Content-Type: text/plain; charset=utf-8"));
        assert!(!headers.contains("\r\nBcc:"));
        assert!(body.starts_with("Collision summary for 2024-03-06\r\n"));
        assert!(!body.replace("\r\n", "").contains('\n'));
    }
}
