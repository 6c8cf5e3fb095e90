//! Archival format codes and format identification.
//!
//! Everything the rest of the workspace knows about a file's format flows
//! through [`FormatCode`], an opaque identifier (in practice a PRONOM PUID
//! such as `fmt/276`). Codes are compared by value and never parsed; the
//! [`catalogue`] attaches human names and file extensions to the codes the
//! bundled engines understand.
//!
//! Identification is delegated to an external service behind the
//! [`Identifier`] trait. [`Siegfried`] is the production implementation.

pub mod catalogue;
pub mod error;
mod identify;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod siegfried;

pub use crate::identify::{Identification, Identifier, IdentifierHandle, hash_file};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockIdentifier;
pub use crate::siegfried::Siegfried;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Code recorded for files the identification service could not classify.
const UNKNOWN: &str = "UNKNOWN";

/// A standardized identifier for a specific file format and version.
///
/// Cloning is cheap (the text is shared), so codes are passed around by value
/// in capability maps, routes and work items alike.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FormatCode(Arc<str>);
impl FormatCode {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(Arc::from(code.as_ref().trim()))
    }

    /// The code assigned to files that could not be identified.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN)
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_empty() || self.0.eq_ignore_ascii_case(UNKNOWN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<&str> for FormatCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}
impl From<String> for FormatCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}
impl From<FormatCode> for String {
    fn from(code: FormatCode) -> Self {
        code.0.to_string()
    }
}
impl AsRef<str> for FormatCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("fmt/276", "fmt/276")]
    #[case("  fmt/276\n", "fmt/276")]
    #[case("x-fmt/111", "x-fmt/111")]
    fn test_code_is_trimmed(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(FormatCode::new(input).as_str(), expected);
    }

    #[rstest]
    #[case("UNKNOWN", true)]
    #[case("unknown", true)]
    #[case("", true)]
    #[case("fmt/40", false)]
    fn test_unknown(#[case] input: &str, #[case] expected: bool) {
        assert_eq!(FormatCode::new(input).is_unknown(), expected);
    }

    #[test]
    fn test_serde_is_transparent() {
        let code: FormatCode = serde_json::from_str(r#""fmt/477""#).unwrap();
        assert_eq!(code, FormatCode::from("fmt/477"));
        assert_eq!(serde_json::to_string(&code).unwrap(), r#""fmt/477""#);
    }
}
