//! Macros for domain enums and identifiers
//!
//! [`impl_domain_status_conversions!`] implements `Display`, `FromStr` and an
//! `as_str` accessor for fieldless status enums. [`define_id!`] declares a
//! UUID v7 newtype identifier.
//!
//! # Example
//!
//! ```rust
//! use cadence_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum RunPhase {
//!     Queued,
//!     InProgress,
//!     Done,
//! }
//!
//! impl_domain_status_conversions!(RunPhase {
//!     Queued => "queued",
//!     InProgress => "in_progress",
//!     Done => "done",
//! });
//!
//! assert_eq!(RunPhase::InProgress.to_string(), "in_progress");
//! assert_eq!("IN-PROGRESS".parse::<RunPhase>().unwrap(), RunPhase::InProgress);
//! ```

/// Implements `as_str`, `Display` and `FromStr` for status enums
///
/// Parsing is case-insensitive and treats `-` like `_`, so `force-stop`,
/// `FORCE_STOP` and `force_stop` are the same value.
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Canonical lowercase name
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.trim().to_lowercase().replace('-', "_").as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

/// Declares a UUID v7 identifier newtype
///
/// The generated type is `Copy`, ordered by creation time, serializes as a
/// bare UUID string, and parses from one.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Generate a new time-ordered identifier
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}
