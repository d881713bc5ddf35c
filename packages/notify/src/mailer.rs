//! Message delivery backends.

use std::path::PathBuf;

use crate::{EmailMessage, NotifyError};

/// Delivers rendered messages.
pub trait Mailer {
    /// Short identifier used in log output.
    fn name(&self) -> &'static str;

    /// Delivers `message`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::NoRecipients`] if `message` has no recipients,
    /// or a backend-specific error if delivery fails.
    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

fn check_recipients(message: &EmailMessage) -> Result<(), NotifyError> {
    if message.to.iter().all(|to| to.trim().is_empty()) {
        return Err(NotifyError::NoRecipients);
    }
    Ok(())
}

/// Writes each message as an `.eml` file into a directory picked up by an
/// external mail relay.
#[derive(Debug, Clone)]
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// First free `collision_summary_<timestamp>[_n].eml` path in the outbox.
    fn next_path(&self, message: &EmailMessage) -> PathBuf {
        let stem = format!("collision_summary_{}", message.date.format("%Y%m%dT%H%M%S"));
        let mut path = self.dir.join(format!("{stem}.eml"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem}_{n}.eml"));
            n += 1;
        }
        path
    }
}

impl Mailer for OutboxMailer {
    fn name(&self) -> &'static str {
        "outbox"
    }

    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        check_recipients(message)?;

        std::fs::create_dir_all(&self.dir).map_err(|source| NotifyError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.next_path(message);
        std::fs::write(&path, message.to_rfc5322()).map_err(|source| NotifyError::Io {
            path: path.clone(),
            source,
        })?;

        log::info!(
            "Summary email to {} queued at {}",
            message.to.join(", "),
            path.display()
        );
        Ok(())
    }
}

/// Logs messages instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        check_recipients(message)?;
        log::info!(
            "Summary email to {}: {}",
            message.to.join(", "),
            message.subject
        );
        log::debug!("{}", message.body);
        Ok(())
    }
}
