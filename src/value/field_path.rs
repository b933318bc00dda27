use crate::errors::{RepositoryError, RepositoryResult};

pub const MAX_FIELD_PATH_DEPTH: usize = 100;

/// A non-empty, dot-separated sequence of segments addressing nested values
/// (spec §3). Raw-path syntax allows a segment containing a literal dot to be
/// quoted with backticks, mirroring how Firestore-style field paths escape
/// reserved characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> RepositoryResult<FieldPath> {
        if raw.is_empty() {
            return Err(RepositoryError::invalid_field(
                "field_path".to_string(),
                "Field path must not be empty".to_string(),
            ));
        }
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '`' => in_quotes = !in_quotes,
                '.' if !in_quotes => {
                    if current.is_empty() {
                        return Err(RepositoryError::invalid_field(
                            "field_path".to_string(),
                            format!("Empty segment in field path: {raw}"),
                        ));
                    }
                    segments.push(std::mem::take(&mut current));
                }
                other => current.push(other),
            }
        }
        if current.is_empty() {
            return Err(RepositoryError::invalid_field(
                "field_path".to_string(),
                format!("Empty trailing segment in field path: {raw}"),
            ));
        }
        segments.push(current);

        if segments.len() > MAX_FIELD_PATH_DEPTH {
            return Err(RepositoryError::invalid_field(
                "field_path".to_string(),
                format!(
                    "Field path depth {} exceeds the maximum of {}",
                    segments.len(),
                    MAX_FIELD_PATH_DEPTH
                ),
            ));
        }

        Ok(FieldPath { segments })
    }

    pub fn simple<S: Into<String>>(segment: S) -> FieldPath {
        FieldPath {
            segments: vec![segment.into()],
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn raw(&self) -> String {
        self.segments.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_and_nested_paths() {
        let simple = FieldPath::parse("status").unwrap();
        assert!(simple.is_simple());
        assert_eq!(simple.segments(), &["status".to_string()]);

        let nested = FieldPath::parse("address.city").unwrap();
        assert!(!nested.is_simple());
        assert_eq!(
            nested.segments(),
            &["address".to_string(), "city".to_string()]
        );
    }

    #[test]
    fn quoted_segment_preserves_literal_dot() {
        let path = FieldPath::parse("`a.b`.c").unwrap();
        assert_eq!(path.segments(), &["a.b".to_string(), "c".to_string()]);
    }

    #[test]
    fn rejects_empty_and_oversized_paths() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("a..b").is_err());

        let too_deep = (0..MAX_FIELD_PATH_DEPTH + 1)
            .map(|i| format!("f{i}"))
            .collect::<Vec<_>>()
            .join(".");
        assert!(FieldPath::parse(&too_deep).is_err());
    }
}
