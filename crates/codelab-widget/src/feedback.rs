//! AI feedback on a finished submission.

use tracing::{info, warn};

use crate::error::Result;
use crate::host::{FeedbackApi, FeedbackRequest};
use crate::websocket::{EventBroadcaster, Tab, WidgetEvent};

/// Shown when the feedback service answers with nothing.
pub const NO_FEEDBACK: &str = "No feedback available";

/// Sends one feedback request and publishes the result to the UI.
pub struct FeedbackRequester<'a, F: FeedbackApi + ?Sized> {
    api: &'a F,
    events: &'a EventBroadcaster,
}

impl<'a, F: FeedbackApi + ?Sized> FeedbackRequester<'a, F> {
    /// Creates a requester that reports through `events`.
    #[must_use]
    pub const fn new(api: &'a F, events: &'a EventBroadcaster) -> Self {
        Self { api, events }
    }

    /// Requests feedback and switches the UI to the feedback tab.
    ///
    /// On failure an inline `feedback_error` event is published and the
    /// error is returned; the attempt is not retried.
    ///
    /// # Errors
    ///
    /// Returns the transport, server or decode error of the feedback call.
    pub async fn request(&self, request: &FeedbackRequest) -> Result<String> {
        match self.api.feedback(request).await {
            Ok(response) => {
                let markdown = if response.response.trim().is_empty() {
                    NO_FEEDBACK.to_string()
                } else {
                    response.response
                };
                info!(chars = markdown.len(), "Feedback received");
                self.events.send(WidgetEvent::feedback(markdown.clone()));
                self.events.send(WidgetEvent::tab_switched(Tab::Feedback));
                Ok(markdown)
            }
            Err(e) => {
                warn!(error = %e, "Feedback request failed");
                self.events.send(WidgetEvent::feedback_error(format!(
                    "Failed to get AI feedback: {}",
                    e.alert_text()
                )));
                Err(e)
            }
        }
    }
}
