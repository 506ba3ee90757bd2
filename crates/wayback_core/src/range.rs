use crate::config::ConfigError;
use crate::Timestamp;

/// Inclusive `[from, to]` window over snapshot timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    from: Timestamp,
    to: Timestamp,
}

impl TimeRange {
    pub fn new(from: Timestamp, to: Timestamp) -> Result<Self, ConfigError> {
        if from > to {
            return Err(ConfigError::InvertedRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Unbounded on both sides.
    pub fn open() -> Self {
        Self {
            from: Timestamp::earliest(),
            to: Timestamp::latest(),
        }
    }

    pub fn single_point(at: Timestamp) -> Self {
        Self { from: at, to: at }
    }

    /// Builds a range from optional user input; a missing bound is open-ended.
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, ConfigError> {
        let from = match from {
            Some(raw) => Timestamp::parse(raw).map_err(|source| ConfigError::Timestamp {
                field: "from",
                source,
            })?,
            None => Timestamp::earliest(),
        };
        let to = match to {
            Some(raw) => Timestamp::parse(raw).map_err(|source| ConfigError::Timestamp {
                field: "to",
                source,
            })?,
            None => Timestamp::latest(),
        };
        Self::new(from, to)
    }

    pub fn from(&self) -> Timestamp {
        self.from
    }

    pub fn to(&self) -> Timestamp {
        self.to
    }

    /// `from == to`: one snapshot per URL, the nearest one at or before the instant.
    pub fn is_single_point(&self) -> bool {
        self.from == self.to
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.from <= ts && ts <= self.to
    }

    /// The window to ask the index for. A single-point range looks back
    /// from the instant, since the capture it selects may be older.
    pub fn index_window(&self) -> TimeRange {
        if self.is_single_point() {
            Self {
                from: Timestamp::earliest(),
                to: self.to,
            }
        } else {
            *self
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = TimeRange::parse(Some("20080101"), Some("20070101")).unwrap_err();
        assert!(matches!(err, ConfigError::InvertedRange { .. }));
    }

    #[test]
    fn missing_bounds_are_open() {
        let range = TimeRange::parse(None, Some("2007")).unwrap();
        assert_eq!(range.from(), Timestamp::earliest());
        assert!(range.contains(Timestamp::parse("19990101").unwrap()));
        assert!(!range.contains(Timestamp::parse("20070102").unwrap()));
    }

    #[test]
    fn single_point_looks_back_in_the_index() {
        let at = Timestamp::parse("20070225").unwrap();
        let window = TimeRange::single_point(at).index_window();
        assert_eq!(window.from(), Timestamp::earliest());
        assert_eq!(window.to(), at);

        let wide = TimeRange::parse(Some("2006"), Some("2008")).unwrap();
        assert_eq!(wide.index_window(), wide);
    }

    #[test]
    fn bounds_are_inclusive() {
        let range = TimeRange::parse(Some("20070101"), Some("20070101")).unwrap();
        assert!(range.is_single_point());
        assert!(range.contains(Timestamp::parse("20070101000000").unwrap()));
        assert!(!range.contains(Timestamp::parse("20070101000001").unwrap()));
    }
}
