use std::sync::Arc;

use super::{
    event_summarizer::EventSummarizer, output::OutputEvent, EventsState, FeatureRequestEvent,
};

/// Output events waiting for the next flush, plus the running summary.
///
/// Owned by the dispatcher. The buffer holds at most `capacity` output events; the summary is
/// never dropped.
#[derive(Debug)]
pub(crate) struct EventBuffer {
    capacity: usize,
    events: Vec<OutputEvent>,
    summarizer: EventSummarizer,
    exceeded_capacity: bool,
    state: Arc<EventsState>,
}

impl EventBuffer {
    pub(crate) fn new(capacity: usize, state: Arc<EventsState>) -> EventBuffer {
        EventBuffer {
            capacity,
            events: Vec::new(),
            summarizer: EventSummarizer::new(),
            exceeded_capacity: false,
            state,
        }
    }

    pub(crate) fn add_event(&mut self, event: OutputEvent) {
        if self.events.len() >= self.capacity {
            if !self.exceeded_capacity {
                self.exceeded_capacity = true;
                log::warn!(target: "flag_events", "exceeded event queue capacity, increase capacity to avoid dropping events");
            }
            self.state.record_dropped_event();
            return;
        }
        self.exceeded_capacity = false;
        self.events.push(event);
    }

    pub(crate) fn add_to_summary(&mut self, event: &FeatureRequestEvent) {
        self.summarizer.summarize_event(event);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty() && self.summarizer.is_empty()
    }

    /// Take every buffered event followed by the summary of the current window, if any.
    pub(crate) fn take_payload(&mut self) -> Vec<OutputEvent> {
        let mut payload = std::mem::take(&mut self.events);
        if let Some(summary) = self.summarizer.reset() {
            payload.push(OutputEvent::Summary(summary));
        }
        payload
    }
}
