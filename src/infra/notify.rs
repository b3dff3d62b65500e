//! Notification capability.
//!
//! A host facility that can show a transient notification. Callers check
//! [`Notifier::permission`] before every dispatch; anything other than
//! [`Permission::Granted`] is a silent no-op for them, never an error.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "infra::notify";
const AUTO_DISMISS: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Never asked, or the user dismissed the prompt.
    Default,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Granted => "granted",
            Permission::Denied => "denied",
            Permission::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Notifications sharing a tag replace each other instead of stacking.
    pub tag: String,
    pub auto_dismiss: Duration,
    /// Clicking brings the application to the foreground.
    pub focus_on_click: bool,
}

impl Notification {
    pub fn meal_reminder(meal: &str) -> Self {
        Self {
            title: format!("Time for {meal}!"),
            body: format!(
                "Don't forget to log your {} in your food diary.",
                meal.to_lowercase()
            ),
            tag: format!("meal-reminder-{meal}"),
            auto_dismiss: AUTO_DISMISS,
            focus_on_click: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notifications are not available on this host")]
    Unavailable,
    #[error("notification could not be shown: {0}")]
    Failed(String),
}

pub trait Notifier: Send + Sync {
    fn permission(&self) -> Permission;

    /// Ask the host for permission; returns the resulting state.
    fn request_permission(&self) -> Permission;

    fn show(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used by the headless reminder agent.
#[derive(Debug)]
pub struct LogNotifier {
    permission: Mutex<Permission>,
}

impl LogNotifier {
    pub fn new(permission: Permission) -> Self {
        Self {
            permission: Mutex::new(permission),
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(Permission::Default)
    }
}

impl Notifier for LogNotifier {
    fn permission(&self) -> Permission {
        *mutex_lock(&self.permission, SOURCE, "permission")
    }

    fn request_permission(&self) -> Permission {
        let mut permission = mutex_lock(&self.permission, SOURCE, "request_permission");
        // A terminal has nobody to deny the prompt.
        if *permission == Permission::Default {
            *permission = Permission::Granted;
        }
        *permission
    }

    fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            title = %notification.title,
            body = %notification.body,
            tag = %notification.tag,
            "Notification"
        );
        Ok(())
    }
}
