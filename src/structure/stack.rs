//! Immutable index stack threaded through `prepare`.

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

/// One value of an index directory, as seen by its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Index {
    Text(String),
    Date(NaiveDate),
    Hour(NaiveDateTime),
    Number(i64),
}

impl Index {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Index::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Index::Date(date) => Some(*date),
            _ => None,
        }
    }

    pub fn as_hour(&self) -> Option<NaiveDateTime> {
        match self {
            Index::Hour(hour) => Some(*hour),
            _ => None,
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Text(text) => f.write_str(text),
            Index::Date(date) => write!(f, "{}", date),
            Index::Hour(hour) => write!(f, "{}", hour),
            Index::Number(number) => write!(f, "{}", number),
        }
    }
}

impl From<String> for Index {
    fn from(value: String) -> Self {
        Index::Text(value)
    }
}

impl From<&str> for Index {
    fn from(value: &str) -> Self {
        Index::Text(value.to_string())
    }
}

impl From<NaiveDate> for Index {
    fn from(value: NaiveDate) -> Self {
        Index::Date(value)
    }
}

impl From<NaiveDateTime> for Index {
    fn from(value: NaiveDateTime) -> Self {
        Index::Hour(value)
    }
}

impl From<i64> for Index {
    fn from(value: i64) -> Self {
        Index::Number(value)
    }
}

#[derive(Debug)]
struct Frame {
    value: Index,
    below: Option<Arc<Frame>>,
}

/// Persistent stack of index values from the root down to the current node.
///
/// `push` shares the existing frames, so sibling subtrees each see their
/// own stack without copying or mutating the parent's.
#[derive(Debug, Clone, Default)]
pub struct IndexStack {
    top: Option<Arc<Frame>>,
    len: usize,
}

impl IndexStack {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn push(&self, value: impl Into<Index>) -> IndexStack {
        IndexStack {
            top: Some(Arc::new(Frame {
                value: value.into(),
                below: self.top.clone(),
            })),
            len: self.len + 1,
        }
    }

    pub fn peek(&self) -> Option<&Index> {
        self.top.as_deref().map(|frame| &frame.value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Values from the top of the stack down to the root.
    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        std::iter::successors(self.top.as_deref(), |frame| frame.below.as_deref())
            .map(|frame| &frame.value)
    }

    /// Closest text value, e.g. the enclosing region.
    pub fn nearest_text(&self) -> Option<&str> {
        self.iter().find_map(Index::as_text)
    }

    pub fn nearest_date(&self) -> Option<NaiveDate> {
        self.iter().find_map(Index::as_date)
    }

    pub fn nearest_hour(&self) -> Option<NaiveDateTime> {
        self.iter().find_map(Index::as_hour)
    }
}
