use serde::{Deserialize, Serialize};

/// A contiguous closed string interval, possibly unbounded above.
///
/// Ranges start out invalid; a worker owns nothing until the master hands it
/// a range (the first worker gets the all-inclusive one) or an operator sets
/// one. Only the owning worker mutates its range after bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    min: String,
    max: String,
    unlimited: bool,
    valid: bool,
}

impl KeyRange {
    /// The bootstrap sentinel: every possible key, `["", ∞)`.
    pub fn all_inclusive() -> Self {
        let mut range = KeyRange::default();
        range.set_all_inclusive();
        range
    }

    pub fn set_all_inclusive(&mut self) {
        self.min = String::new();
        self.max = String::new();
        self.unlimited = true;
        self.valid = true;
    }

    /// Sets the bounds. Rejected (returning `false`, leaving the range
    /// untouched) when `min > max` on a bounded range.
    pub fn set_min_max(&mut self, min: &str, max: &str, unlimited: bool) -> bool {
        if !unlimited && min > max {
            return false;
        }
        self.min = min.to_string();
        self.max = if unlimited && max < min {
            min.to_string()
        } else {
            max.to_string()
        };
        self.unlimited = unlimited;
        self.valid = true;
        true
    }

    /// True iff this range is valid and covers `key`.
    pub fn in_range(&self, key: &str) -> bool {
        self.valid && key >= self.min.as_str() && (self.unlimited || key <= self.max.as_str())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }

    pub fn min(&self) -> &str {
        &self.min
    }

    pub fn max(&self) -> &str {
        &self.max
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.valid {
            return write!(f, "[invalid]");
        }
        if self.unlimited {
            write!(f, "[{:?}, unlimited)", self.min)
        } else {
            write!(f, "[{:?}, {:?}]", self.min, self.max)
        }
    }
}
