//! Cache Category Module
//!
//! Namespaces partitioning the cache on disk.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

// == Category ==
/// A namespace partition within the cache, one directory per variant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Individual issues and tasks
    WorkItems,
    /// Query result sets
    Queries,
    /// Anything else
    #[default]
    General,
}

impl Category {
    /// Every value partition, in directory-walk order.
    pub const ALL: [Category; 3] = [Category::WorkItems, Category::Queries, Category::General];

    /// Directory name of this partition under the cache root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::WorkItems => "workitems",
            Category::Queries => "queries",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Category {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.dir_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CacheError::UnknownCategory(s.to_string()))
    }
}
