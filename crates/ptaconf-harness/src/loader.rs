//! Manifest and suite loading.
//!
//! A manifest names suite directories in order; each directory holds a
//! `tests.json`. Loading flattens every suite into one ordered catalogue,
//! classifying each test once.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::model::{Expected, Input, TestCase, TestKind};

/// Top-level catalogue descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Suite directories, relative to the manifest, in execution order.
    #[serde(default)]
    pub test_directories: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        if !path.is_file() {
            return Err(LoadError::MissingManifest(path.to_path_buf()));
        }
        let content = read(path)?;
        Self::from_json(&content).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SuiteFile {
    #[serde(default)]
    suite: Option<String>,
    #[serde(default)]
    tests: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TestRecord {
    id: String,
    description: String,
    #[serde(default)]
    input: Input,
    #[serde(default)]
    expected: Expected,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    skip: bool,
    #[serde(default)]
    skip_reason: Option<String>,
    #[serde(default)]
    spec_ref: Option<String>,
}

/// Every test reachable from one manifest.
#[derive(Debug, Clone)]
pub struct Catalogue {
    pub manifest: Manifest,
    /// Directory containing the manifest.
    pub base_dir: PathBuf,
    pub cases: Vec<TestCase>,
    /// Declared suite directories that had no `tests.json`.
    pub missing_suites: Vec<PathBuf>,
}

/// Load the manifest at `path` and every suite it declares.
pub fn load_catalogue(path: &Path) -> Result<Catalogue, LoadError> {
    let manifest = Manifest::from_file(path)?;
    let base_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let mut cases: Vec<TestCase> = Vec::new();
    let mut missing_suites = Vec::new();
    let mut seen: HashMap<String, String> = HashMap::new();

    for dir in &manifest.test_directories {
        let tests_file = base_dir.join(dir).join("tests.json");
        if !tests_file.is_file() {
            missing_suites.push(tests_file);
            continue;
        }
        for case in load_suite(&tests_file)? {
            if let Some(first_suite) = seen.get(&case.id) {
                return Err(LoadError::DuplicateId {
                    id: case.id,
                    first_suite: first_suite.clone(),
                    second_suite: case.suite,
                });
            }
            seen.insert(case.id.clone(), case.suite.clone());
            cases.push(case);
        }
    }

    Ok(Catalogue {
        manifest,
        base_dir,
        cases,
        missing_suites,
    })
}

/// Load one `tests.json`, preserving file order.
pub fn load_suite(path: &Path) -> Result<Vec<TestCase>, LoadError> {
    let content = read(path)?;
    let json_err = |source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    };
    let file: SuiteFile = serde_json::from_str(&content).map_err(json_err)?;

    let suite_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let suite = file.suite.unwrap_or_else(|| {
        suite_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let mut cases = Vec::with_capacity(file.tests.len());
    for (index, raw) in file.tests.into_iter().enumerate() {
        for field in ["id", "description"] {
            if !raw.get(field).is_some_and(serde_json::Value::is_string) {
                return Err(LoadError::MissingField {
                    path: path.to_path_buf(),
                    index,
                    field,
                });
            }
        }
        let record: TestRecord = serde_json::from_value(raw).map_err(json_err)?;
        cases.push(build_case(record, &suite, &suite_dir)?);
    }
    Ok(cases)
}

fn build_case(record: TestRecord, suite: &str, suite_dir: &Path) -> Result<TestCase, LoadError> {
    let invalid = |reason: &str| LoadError::InvalidInput {
        id: record.id.clone(),
        reason: reason.to_string(),
    };
    match (&record.input.inline, &record.input.file) {
        (Some(_), Some(_)) => return Err(invalid("input has both 'inline' and 'file'")),
        (None, None) => return Err(invalid("input needs one of 'inline' or 'file'")),
        _ => {}
    }
    let kind = TestKind::infer(&record.input, &record.expected);
    if kind == TestKind::Query && record.input.query.is_none() {
        return Err(invalid("query test has no 'input.query'"));
    }

    Ok(TestCase {
        id: record.id,
        description: record.description,
        suite: suite.to_string(),
        suite_dir: suite_dir.to_path_buf(),
        tags: record.tags.into_iter().collect::<BTreeSet<_>>(),
        skip: record.skip,
        skip_reason: record.skip_reason,
        spec_ref: record.spec_ref,
        input: record.input,
        expected: record.expected,
        kind,
    })
}

fn read(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Selection criteria. Every populated criterion must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestFilter {
    /// Exact id.
    pub test_id: Option<String>,
    /// Suite name (exact or prefix) or a fragment of the suite directory path.
    pub suite: Option<String>,
    /// Keep a test carrying at least one of these.
    pub tags: Vec<String>,
}

impl TestFilter {
    #[must_use]
    pub fn matches(&self, case: &TestCase) -> bool {
        if let Some(id) = &self.test_id
            && &case.id != id
        {
            return false;
        }
        if let Some(suite) = &self.suite
            && !(case.suite.starts_with(suite.as_str())
                || case.suite_dir.to_string_lossy().contains(suite.as_str()))
        {
            return false;
        }
        self.tags.is_empty() || self.tags.iter().any(|tag| case.tags.contains(tag))
    }

    /// Pure selection over an already-loaded list, preserving order.
    #[must_use]
    pub fn apply<'a>(&self, cases: &'a [TestCase]) -> Vec<&'a TestCase> {
        cases.iter().filter(|case| self.matches(case)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, body: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    fn catalogue_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "manifest.json",
            r#"{"format":"beancount","version":"3","description":"d",
                "test_directories":["suites/syntax","suites/empty","suites/query"]}"#,
        );
        write(
            dir.path(),
            "suites/syntax/tests.json",
            r#"{"suite":"syntax-basic","tests":[
                {"id":"s1","description":"open","input":{"inline":"2020-01-01 open Assets:Cash"},"expected":{"parse":"success"},"tags":["open","smoke"]},
                {"id":"s2","description":"file","input":{"file":"a.beancount"},"expected":{"validate":"error"}}
            ]}"#,
        );
        write(
            dir.path(),
            "suites/query/tests.json",
            r#"{"tests":[
                {"id":"q1","description":"q","input":{"inline":"","query":"SELECT account"},"expected":{"query":"success","validate":"success"},"tags":["bql"]}
            ]}"#,
        );
        dir
    }

    #[test]
    fn flattens_suites_in_manifest_order() {
        let dir = catalogue_dir();
        let catalogue = load_catalogue(&dir.path().join("manifest.json")).unwrap();
        let ids: Vec<&str> = catalogue.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["s1", "s2", "q1"]);
        assert_eq!(catalogue.missing_suites.len(), 1);
        assert_eq!(catalogue.manifest.format, "beancount");

        let kinds: Vec<TestKind> = catalogue.cases.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            [TestKind::Syntax, TestKind::Validation, TestKind::Query]
        );
        assert_eq!(catalogue.cases[0].suite, "syntax-basic");
        assert_eq!(catalogue.cases[2].suite, "query");
    }

    #[test]
    fn filters_by_id_suite_and_tags() {
        let dir = catalogue_dir();
        let catalogue = load_catalogue(&dir.path().join("manifest.json")).unwrap();
        let ids = |filter: TestFilter| -> Vec<String> {
            filter
                .apply(&catalogue.cases)
                .into_iter()
                .map(|c| c.id.clone())
                .collect()
        };

        assert_eq!(
            ids(TestFilter {
                test_id: Some("s2".into()),
                ..TestFilter::default()
            }),
            ["s2"]
        );
        assert_eq!(
            ids(TestFilter {
                suite: Some("syntax".into()),
                ..TestFilter::default()
            }),
            ["s1", "s2"]
        );
        assert_eq!(
            ids(TestFilter {
                suite: Some("suites/query".into()),
                ..TestFilter::default()
            }),
            ["q1"]
        );
        assert_eq!(
            ids(TestFilter {
                tags: vec!["smoke".into(), "bql".into()],
                ..TestFilter::default()
            }),
            ["s1", "q1"]
        );
        assert_eq!(ids(TestFilter::default()).len(), 3);
    }

    #[test]
    fn missing_description_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "s/tests.json",
            r#"{"tests":[{"id":"ok","description":"x","input":{"inline":""}},{"id":"bad","input":{"inline":""}}]}"#,
        );
        let err = load_suite(&path).unwrap_err();
        assert!(matches!(
            err,
            LoadError::MissingField {
                index: 1,
                field: "description",
                ..
            }
        ));
    }

    #[test]
    fn input_shape_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let both = write(
            dir.path(),
            "both/tests.json",
            r#"{"tests":[{"id":"b","description":"x","input":{"inline":"","file":"f"}}]}"#,
        );
        assert!(matches!(
            load_suite(&both),
            Err(LoadError::InvalidInput { .. })
        ));

        let no_query = write(
            dir.path(),
            "q/tests.json",
            r#"{"tests":[{"id":"q","description":"x","input":{"inline":""},"expected":{"query":"error"}}]}"#,
        );
        let err = load_suite(&no_query).unwrap_err();
        assert!(err.to_string().contains("input.query"));
    }

    #[test]
    fn duplicate_ids_across_suites_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "manifest.json",
            r#"{"test_directories":["a","b"]}"#,
        );
        let record = r#"{"tests":[{"id":"same","description":"x","input":{"inline":""}}]}"#;
        write(dir.path(), "a/tests.json", record);
        write(dir.path(), "b/tests.json", record);
        let err = load_catalogue(&dir.path().join("manifest.json")).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateId { ref id, .. } if id == "same"));
    }

    #[test]
    fn missing_manifest_is_reported() {
        let err = load_catalogue(Path::new("/nonexistent/ptaconf/manifest.json")).unwrap_err();
        assert!(matches!(err, LoadError::MissingManifest(_)));
    }
}
