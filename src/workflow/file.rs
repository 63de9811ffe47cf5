//! Files exchanged between tasks

use serde::{Deserialize, Serialize};

/// Kilobytes per megabit, for converting file sizes to transfer units
pub const KILOBYTES_IN_MEGABIT: f64 = 125.0;

/// A file consumed or produced by a task.
///
/// Value type; two files are the same file iff name and size match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct File {
    /// File name, unique within a workflow trace
    pub name: String,
    /// Size in kilobytes
    pub size_kb: u64,
}

impl File {
    /// Create a new file descriptor
    pub fn new(name: impl Into<String>, size_kb: u64) -> Self {
        Self {
            name: name.into(),
            size_kb,
        }
    }

    /// Size in megabits, the unit of bandwidth formulas
    pub fn size_in_megabits(&self) -> f64 {
        self.size_kb as f64 / KILOBYTES_IN_MEGABIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_conversion() {
        let file = File::new("chr21.vcf", 250);
        assert_eq!(file.size_in_megabits(), 2.0);
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(File::new("a", 1), File::new("a", 1));
        assert_ne!(File::new("a", 1), File::new("a", 2));
        assert_ne!(File::new("a", 1), File::new("b", 1));
    }
}
