#![forbid(unsafe_code)]

pub mod ids {
    const MAX_ID_LEN: usize = 128;

    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct ProjectId(String);

    impl ProjectId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_project_id(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for ProjectId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// Canonical key of a cluster, unique within a project.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct ClusterKey(String);

    impl ClusterKey {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn into_string(self) -> String {
            self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_cluster_key(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for ClusterKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// Logical query stream ("timeline", "folder", "people", ...). Each channel carries its own
    /// generation counter.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct Channel(String);

    impl Channel {
        pub fn timeline() -> Self {
            Self("timeline".to_string())
        }

        pub fn folder() -> Self {
            Self("folder".to_string())
        }

        pub fn people() -> Self {
            Self("people".to_string())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_channel(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for Channel {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum IdError {
        Empty,
        TooLong,
        InvalidFirstChar,
        InvalidChar { ch: char, index: usize },
        ContainsControl,
    }

    impl IdError {
        pub fn message(&self) -> &'static str {
            match self {
                Self::Empty => "id must not be empty",
                Self::TooLong => "id is too long",
                Self::InvalidFirstChar => "id must start with an ascii letter or digit",
                Self::InvalidChar { .. } => "id contains an unsupported character",
                Self::ContainsControl => "id contains control characters",
            }
        }
    }

    fn validate_project_id(value: &str) -> Result<(), IdError> {
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if value.len() > MAX_ID_LEN {
            return Err(IdError::TooLong);
        }
        let Some(first) = value.chars().next() else {
            return Err(IdError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(IdError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate().skip(1) {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '/' | '-') {
                continue;
            }
            return Err(IdError::InvalidChar { ch, index });
        }
        Ok(())
    }

    /// Channel names are short ascii tags: `timeline`, `folder`, `people-search`.
    fn validate_channel(value: &str) -> Result<(), IdError> {
        let Some(first) = value.chars().next() else {
            return Err(IdError::Empty);
        };
        if value.len() > MAX_ID_LEN {
            return Err(IdError::TooLong);
        }
        if !first.is_ascii_alphabetic() {
            return Err(IdError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate().skip(1) {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.') {
                continue;
            }
            return Err(IdError::InvalidChar { ch, index });
        }
        Ok(())
    }

    fn validate_cluster_key(value: &str) -> Result<(), IdError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        if trimmed.len() != value.len() {
            return Err(IdError::InvalidFirstChar);
        }
        if value.len() > MAX_ID_LEN {
            return Err(IdError::TooLong);
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(IdError::ContainsControl);
        }
        Ok(())
    }
}

pub mod filter {
    use crate::ids::ClusterKey;

    /// Media-attribute bucket for non-feature media.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum MediaBucket {
        /// Videos whose duration falls in `[min_ms, max_ms]`.
        Duration { min_ms: i64, max_ms: i64 },
        /// Records whose `width * height` falls in `[min_pixels, max_pixels]`.
        Resolution { min_pixels: i64, max_pixels: i64 },
    }

    /// Recognised query predicates over parent records.
    #[derive(Clone, Debug, PartialEq, Eq, Default)]
    pub enum FilterSpec {
        #[default]
        All,
        /// Capture time in `[from_ms, to_ms)`; an open bound is `None`.
        DateRange {
            from_ms: Option<i64>,
            to_ms: Option<i64>,
        },
        PathPrefix(String),
        ClusterKey(ClusterKey),
        MediaBucket(MediaBucket),
        And(Vec<FilterSpec>),
    }

    impl FilterSpec {
        pub fn and(self, other: FilterSpec) -> FilterSpec {
            match (self, other) {
                (FilterSpec::All, other) => other,
                (this, FilterSpec::All) => this,
                (FilterSpec::And(mut left), FilterSpec::And(right)) => {
                    left.extend(right);
                    FilterSpec::And(left)
                }
                (FilterSpec::And(mut left), other) => {
                    left.push(other);
                    FilterSpec::And(left)
                }
                (this, other) => FilterSpec::And(vec![this, other]),
            }
        }

        pub fn is_all(&self) -> bool {
            match self {
                FilterSpec::All => true,
                FilterSpec::And(parts) => parts.iter().all(FilterSpec::is_all),
                _ => false,
            }
        }
    }
}

pub mod model {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MediaKind {
        Image,
        Video,
    }

    impl MediaKind {
        pub fn as_str(self) -> &'static str {
            match self {
                MediaKind::Image => "image",
                MediaKind::Video => "video",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "image" => Some(MediaKind::Image),
                "video" => Some(MediaKind::Video),
                _ => None,
            }
        }
    }

    /// Bounding box of a detected feature, in normalised image coordinates.
    #[derive(Clone, Copy, Debug, PartialEq, Default)]
    pub struct Geometry {
        pub x: f64,
        pub y: f64,
        pub width: f64,
        pub height: f64,
    }
}
