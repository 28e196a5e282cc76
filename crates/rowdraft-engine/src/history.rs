/// Linear undo/redo timeline for one cell.
///
/// `timeline[0]` is always the baseline and `cursor` always indexes into `timeline`.
/// Values are the cell's display text; `None` is SQL `NULL`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellHistory {
    baseline: Option<String>,
    timeline: Vec<Option<String>>,
    cursor: usize,
}

impl CellHistory {
    pub fn new(baseline: Option<String>) -> Self {
        Self {
            timeline: vec![baseline.clone()],
            baseline,
            cursor: 0,
        }
    }

    pub fn baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    pub fn current(&self) -> Option<&str> {
        self.timeline[self.cursor].as_deref()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn timeline(&self) -> &[Option<String>] {
        &self.timeline
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.timeline.len()
    }

    /// True when the current value differs from the baseline.
    pub fn is_dirty(&self) -> bool {
        self.current() != self.baseline()
    }

    /// Record a new value. Anything after the cursor is discarded first.
    ///
    /// Setting the value the cursor already points at records nothing.
    pub fn set_value(&mut self, value: Option<String>) -> Option<&str> {
        if self.timeline[self.cursor] != value {
            self.timeline.truncate(self.cursor + 1);
            self.timeline.push(value);
            self.cursor = self.timeline.len() - 1;
        }
        self.current()
    }

    pub fn undo(&mut self) -> Option<&str> {
        if self.can_undo() {
            self.cursor -= 1;
        }
        self.current()
    }

    pub fn redo(&mut self) -> Option<&str> {
        if self.can_redo() {
            self.cursor += 1;
        }
        self.current()
    }

    /// Collapse the timeline to a single entry.
    ///
    /// `Some(value)` adopts `value` as the new baseline (used after a commit);
    /// `None` falls back to the existing baseline (used on discard).
    pub fn reset(&mut self, value: Option<Option<String>>) -> Option<&str> {
        if let Some(value) = value {
            self.baseline = value;
        }
        self.timeline.clear();
        self.timeline.push(self.baseline.clone());
        self.cursor = 0;
        self.current()
    }
}
