use std::cmp::Ordering;

/// Dispatch priority used by [`PriorityQueue`](crate::queue::PriorityQueue).
///
/// Lower values are served first. Priorities are totally ordered, so any `f64`
/// (including negative values and infinities) can be used. `-0.0` is stored as `0.0`
/// so the two zeros tie.
#[derive(Clone, Copy, Debug)]
#[must_use]
pub struct Priority(f64);

impl Priority {
    /// Served before every finite priority.
    pub const FIRST: Self = Self(f64::NEG_INFINITY);

    /// Served after every finite priority.
    pub const LAST: Self = Self(f64::INFINITY);

    /// Create a new priority level from a raw value
    pub const fn new(value: f64) -> Self {
        // Adding positive zero turns -0.0 into 0.0 and leaves every other value alone.
        Self(value + 0.0)
    }

    /// Get the raw priority value
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.0
    }

    /// Create a priority that is served slightly earlier (-10)
    pub fn higher(&self) -> Self {
        Self(self.0 - 10.0)
    }

    /// Create a priority that is served slightly later (+10)
    pub fn lower(&self) -> Self {
        Self(self.0 + 10.0)
    }
}

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(0.0)
    }
}

impl From<f64> for Priority {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(f64::from(value))
    }
}

impl From<Priority> for f64 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}
