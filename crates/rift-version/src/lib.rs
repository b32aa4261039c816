//! This library provides a strongly-typed RIFT.ware release version. Versions
//! consist of exactly five numeric components separated by dots, for example
//! `8.3.0.1.123456`.
//!
//! ## Usage
//!
//! Versions can be parsed and validated from [`str`] using Rust's standard
//! [`FromStr`](std::str::FromStr) trait.
//!
//! ```
//! use rift_version::RwVersion;
//!
//! let version: RwVersion = "8.3.0.1.123456".parse()
//!     .expect("valid RIFT.ware version");
//!
//! assert_eq!(version.components(), [8, 3, 0, 1, 123456]);
//! ```
//!
//! Installation directories are named after versions which are not always
//! well-formed. [`compare_lenient`] compares two raw version strings and
//! treats anything it cannot parse as equal, so callers fall back to doing
//! nothing special.
//!
//! ```
//! use std::cmp::Ordering;
//! use rift_version::compare_lenient;
//!
//! assert_eq!(compare_lenient("1.2.3.4.5", "1.2.3.4.6"), Ordering::Less);
//! assert_eq!(compare_lenient("1.2.3", "1.2.3.4.6"), Ordering::Equal);
//! ```

#[cfg(test)]
use rstest_reuse::{self};

mod version;

pub use version::*;
