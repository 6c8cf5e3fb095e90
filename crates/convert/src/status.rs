use conveyor_format::{FormatCode, Identification, Identifier};
use std::path::Path;

/// What the identification service says about a produced file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Verified(Identification),
    /// Identified, but as something else.
    Mismatch(FormatCode),
    /// Missing or unclassifiable.
    Unidentified,
    /// The service failed; carries its error message.
    Unavailable(String),
}

/// Re-identifies `path` and compares the result against `expected`.
pub async fn check_status(identifier: &dyn Identifier, path: &Path, expected: &FormatCode) -> Status {
    match identifier.identify(path, false).await {
        Ok(Some(found)) if &found.format == expected => Status::Verified(found),
        Ok(Some(found)) => Status::Mismatch(found.format),
        Ok(None) => Status::Unidentified,
        Err(e) => Status::Unavailable((*e).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_format::MockIdentifier;

    #[tokio::test]
    async fn test_check_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        std::fs::write(&path, "fmt/276\n").unwrap();
        let identifier = MockIdentifier::default();

        let status = check_status(&identifier, &path, &"fmt/276".into()).await;
        assert!(matches!(status, Status::Verified(found) if found.format.as_str() == "fmt/276"));

        let status = check_status(&identifier, &path, &"fmt/477".into()).await;
        assert_eq!(status, Status::Mismatch("fmt/276".into()));

        let status = check_status(&identifier, &dir.path().join("gone.pdf"), &"fmt/276".into()).await;
        assert_eq!(status, Status::Unidentified);
    }

    #[tokio::test]
    async fn test_unavailable_service() {
        let dir = tempfile::tempdir().unwrap();
        let status = check_status(&MockIdentifier::unavailable(), dir.path(), &"fmt/276".into()).await;
        assert!(matches!(status, Status::Unavailable(_)));
    }
}
