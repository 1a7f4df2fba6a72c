//! Forwards transport notifications to the registered user callback

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};

use contracts::{Notification, NotificationCallback, Severity};
use tracing::{debug, error, warn};

#[derive(Default)]
pub struct NotificationsProcessor {
    callback: Mutex<Option<NotificationCallback>>,
}

impl NotificationsProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&self, callback: NotificationCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn get_callback(&self) -> Option<NotificationCallback> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn raise_notification(&self, notification: Notification) {
        if notification.severity >= Severity::Error {
            warn!(notification = %notification, "device notification");
        }
        match self.get_callback() {
            Some(callback) => {
                if catch_unwind(AssertUnwindSafe(|| callback(notification))).is_err() {
                    error!("panic during notification callback");
                }
            }
            None => debug!(notification = %notification, "notification without subscriber"),
        }
    }
}
