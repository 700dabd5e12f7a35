//! Parallel parsing of many documents.
//!
//! Every file gets its own resolver and cache, so parses share nothing but
//! the [`Parser`] settings and its [`FileSystem`](crate::FileSystem).
//!
//! # Example
//!
//! ```ignore
//! let batcher = Batcher::new(Parser::new());
//! let results = batcher.batch_unmarshal::<serde_json::Value, _>(&files);
//! ```

use std::path::Path;

use rayon::prelude::*;
use serde::de::DeserializeOwned;

use crate::parser::{ParseError, Parsed, Parser};

/// Runs [`Parser::unmarshal_file`] over many paths in parallel.
#[derive(Debug, Clone, Default)]
pub struct Batcher {
    parser: Parser,
}

impl Batcher {
    pub fn new(parser: Parser) -> Self {
        Self { parser }
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Parse `paths` in parallel. Results are in input order.
    pub fn batch_unmarshal<T, P>(&self, paths: &[P]) -> Vec<Result<Parsed<T>, ParseError>>
    where
        T: DeserializeOwned + Send,
        P: AsRef<Path> + Sync,
    {
        self.batch_unmarshal_each(paths, |_| {})
    }

    /// Like [`batch_unmarshal`](Self::batch_unmarshal), calling `on_each`
    /// after every file (e.g. for progress reporting).
    pub fn batch_unmarshal_each<T, P, F>(
        &self,
        paths: &[P],
        on_each: F,
    ) -> Vec<Result<Parsed<T>, ParseError>>
    where
        T: DeserializeOwned + Send,
        P: AsRef<Path> + Sync,
        F: Fn(&Path) + Sync,
    {
        if paths.is_empty() {
            return vec![];
        }

        tracing::debug!(files = paths.len(), "batch parse");

        paths
            .par_iter()
            .map(|path| {
                let path = path.as_ref();
                let result = self.parser.unmarshal_file(path);
                on_each(path);
                result
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::file::MemoryFileSystem;

    fn batcher() -> Batcher {
        let mut fs = MemoryFileSystem::new();
        fs.insert("/work/shared.libsonnet", "{ shared: true }");
        for i in 0..16 {
            fs.insert(
                format!("/work/doc{i}.jsonnet"),
                format!("(import 'shared.libsonnet') + {{ id: {i} }}"),
            );
        }
        fs.insert("/work/bad.jsonnet", "import '/etc/hosts'");
        Batcher::new(
            Parser::builder()
                .base_dir("/work")
                .file_system(Arc::new(fs))
                .build(),
        )
    }

    #[test]
    fn test_results_in_input_order() {
        let paths: Vec<String> = (0..16).map(|i| format!("doc{i}.jsonnet")).collect();
        let results = batcher().batch_unmarshal::<serde_json::Value, _>(&paths);
        assert_eq!(results.len(), 16);
        for (i, result) in results.into_iter().enumerate() {
            let parsed = result.unwrap();
            assert_eq!(parsed.value["id"], serde_json::json!(i));
            assert_eq!(parsed.value["shared"], serde_json::json!(true));
        }
    }

    #[test]
    fn test_failures_stay_per_file() {
        let paths = ["doc0.jsonnet", "bad.jsonnet", "missing.jsonnet"];
        let results = batcher().batch_unmarshal::<serde_json::Value, _>(&paths);
        assert!(results[0].is_ok());
        assert!(results[1]
            .as_ref()
            .unwrap_err()
            .resolve_error()
            .is_some_and(|e| e.is_access_denied()));
        assert!(matches!(results[2], Err(ParseError::Read { .. })));
    }

    #[test]
    fn test_on_each_called_per_file() {
        let count = AtomicUsize::new(0);
        let paths = ["doc1.jsonnet", "doc2.jsonnet"];
        let _ = batcher().batch_unmarshal_each::<serde_json::Value, _, _>(&paths, |_| {
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_empty_input() {
        let paths: [&str; 0] = [];
        assert!(batcher().batch_unmarshal::<serde_json::Value, _>(&paths).is_empty());
    }
}
