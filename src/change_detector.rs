//! Change detection for script text buffers.
//!
//! [`TextWatcher`] polls registered buffers at a fixed cadence from the host's
//! timer loop. External buffers are reloaded from disk when their file's
//! modification time advances, then the content is compared against the last
//! observed snapshot and the watch callback fires once per change.
//!
//! [`Debouncer`] coalesces bursts of notifications: it fires once, on the
//! trailing edge, after no new call has arrived for the settle duration.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant, SystemTime};

use crate::text_source::SharedText;

/// Default text polling rate.
pub const POLL_RATE: Duration = Duration::from_millis(100);

type Callback = Rc<RefCell<dyn FnMut()>>;

struct WatchEntry {
    id: u64,
    text: SharedText,
    interval: Duration,
    next_due: Option<Instant>,
    last_content: String,
    last_modified: Option<SystemTime>,
    callback: Callback,
    disposed: Rc<Cell<bool>>,
}

impl WatchEntry {
    /// Reload external content if needed and report whether the text changed.
    fn check(&mut self) -> bool {
        let mut text = self.text.borrow_mut();

        if text.is_external() {
            match text.modified_time() {
                Ok(modified) => {
                    let advanced = self.last_modified.map_or(true, |last| modified > last);
                    if advanced {
                        self.last_modified = Some(modified);
                        if let Err(e) = text.reload() {
                            log::debug!("Skipping reload of '{}': {}", text.name(), e);
                        }
                    }
                }
                Err(e) => {
                    // Deleted or unreadable between ticks; try again next tick.
                    log::debug!("Skipping reload of '{}': {}", text.name(), e);
                }
            }
        }

        if text.content() != self.last_content {
            self.last_content = text.content().to_string();
            return true;
        }
        false
    }
}

/// Disposer for one watch. Disposing twice is a no-op.
pub struct WatchHandle {
    id: u64,
    disposed: Rc<Cell<bool>>,
    entries: Weak<RefCell<Vec<WatchEntry>>>,
}

impl WatchHandle {
    /// Unregister the watch permanently.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Some(entries) = self.entries.upgrade() {
            // During a poll the entry list is borrowed; the flag alone is
            // enough then, the entry is dropped on the next poll.
            if let Ok(mut entries) = entries.try_borrow_mut() {
                entries.retain(|e| e.id != self.id);
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

/// Polls text buffers for changes.
#[derive(Default)]
pub struct TextWatcher {
    entries: Rc<RefCell<Vec<WatchEntry>>>,
    next_id: u64,
}

impl TextWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `text`, invoking `on_change` once per observed change.
    pub fn watch(
        &mut self,
        text: SharedText,
        interval: Duration,
        on_change: impl FnMut() + 'static,
    ) -> WatchHandle {
        self.next_id += 1;
        let id = self.next_id;

        let (last_content, last_modified) = {
            let text = text.borrow();
            let modified = if text.is_external() {
                text.modified_time().ok()
            } else {
                None
            };
            (text.content().to_string(), modified)
        };

        let disposed = Rc::new(Cell::new(false));
        self.entries.borrow_mut().push(WatchEntry {
            id,
            text,
            interval,
            next_due: None,
            last_content,
            last_modified,
            callback: Rc::new(RefCell::new(on_change)),
            disposed: disposed.clone(),
        });

        WatchHandle {
            id,
            disposed,
            entries: Rc::downgrade(&self.entries),
        }
    }

    /// Run every watch whose interval has elapsed. Called by the host timer.
    pub fn poll(&self, now: Instant) {
        let mut fired: Vec<(Rc<Cell<bool>>, Callback)> = Vec::new();

        {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|e| !e.disposed.get());

            for entry in entries.iter_mut() {
                if matches!(entry.next_due, Some(due) if now < due) {
                    continue;
                }
                entry.next_due = Some(now + entry.interval);

                if entry.check() {
                    fired.push((entry.disposed.clone(), entry.callback.clone()));
                }
            }
        }

        // Callbacks run with the entry list released so they may dispose watches.
        for (disposed, callback) in fired {
            if disposed.get() {
                continue;
            }
            (&mut *callback.borrow_mut())();
        }
    }

    /// Number of live watches.
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| !e.disposed.get())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trailing-edge debounce timer.
#[derive(Debug, Clone)]
pub struct Debouncer {
    settle: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            deadline: None,
        }
    }

    /// Register a notification, restarting the settle timer.
    pub fn call(&mut self, now: Instant) {
        self.deadline = Some(now + self.settle);
    }

    /// Returns true exactly once when the settle time has passed since the
    /// last call.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }
}
