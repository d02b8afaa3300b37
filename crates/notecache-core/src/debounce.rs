// ABOUTME: Debounce window logic shared by the update notification and the durable flush.
// ABOUTME: Pure state machine driven by caller-supplied instants so it runs under paused time.

use std::time::Duration;

use tokio::time::Instant;

/// Which edge of a burst fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// The first trigger fires at once; further triggers inside the window
    /// coalesce into a single fire when the window closes.
    Leading,
    /// The first trigger opens a window; one fire happens when it closes,
    /// covering every trigger received meanwhile.
    Trailing,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    period: Duration,
    edge: Edge,
    window_end: Option<Instant>,
    pending: bool,
}

impl Debouncer {
    pub fn new(period: Duration, edge: Edge) -> Self {
        Self {
            period,
            edge,
            window_end: None,
            pending: false,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Register a change. Returns true when the caller should fire now.
    pub fn trigger(&mut self, now: Instant) -> bool {
        let in_window = self.window_end.is_some_and(|end| now < end);
        if in_window {
            self.pending = true;
            return false;
        }

        self.window_end = Some(now + self.period);
        match self.edge {
            Edge::Leading => {
                self.pending = false;
                true
            }
            Edge::Trailing => {
                self.pending = true;
                false
            }
        }
    }

    /// When the next deferred fire is due, if one is owed.
    pub fn deadline(&self) -> Option<Instant> {
        if self.pending { self.window_end } else { None }
    }

    /// Called when the deadline passes. Returns true when the caller should
    /// fire now.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.window_end {
            Some(end) if self.pending && now >= end => {
                self.pending = false;
                // A leading debouncer keeps a quiet window after a trailing
                // fire so the next trigger does not double-fire.
                self.window_end = match self.edge {
                    Edge::Leading => Some(now + self.period),
                    Edge::Trailing => None,
                };
                true
            }
            _ => false,
        }
    }

    /// Forget any owed fire, e.g. after a forced flush.
    pub fn reset(&mut self) {
        self.window_end = None;
        self.pending = false;
    }
}
