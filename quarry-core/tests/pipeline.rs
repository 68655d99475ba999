//! End-to-end job runs against the local engine and the fixtures in `tests/fixtures`.

use pretty_assertions::assert_eq;
use quarry_core::job::parser::{parse_value, substitute_vars};
use quarry_core::{
    ConfigError, DataFormat, DataType, DocumentFormat, Engine, ExecutionMode, Job, JobError,
    JobStatus, LocalEngine, Options, QueryStatus, ReadRequest, Schema, SessionProvider,
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

/// Read a fixture document with `${FIXTURES}` and `${OUTPUT}` filled in.
fn fixture_value(relative: &str, format: DocumentFormat, output: &Path) -> Result<Value, ConfigError> {
    let text = std::fs::read_to_string(fixtures().join(relative)).unwrap();
    let fixtures_dir = fixtures().display().to_string();
    let output_dir = output.display().to_string();
    let text = substitute_vars(&text, |name| match name {
        "FIXTURES" => Some(fixtures_dir.clone()),
        "OUTPUT" => Some(output_dir.clone()),
        _ => None,
    })?;
    parse_value(&text, format)
}

fn fixture_job(relative: &str, format: DocumentFormat, output: &Path) -> Result<Job, ConfigError> {
    Job::from_value(&fixture_value(relative, format, output)?)
}

fn provider() -> SessionProvider {
    SessionProvider::with_engine(Arc::new(LocalEngine::default()))
}

async fn read_back(
    location: &Path,
    format: DataFormat,
    options: Options,
    schema: Option<Schema>,
) -> Vec<Vec<Value>> {
    let dataset = LocalEngine::default()
        .read(&ReadRequest {
            name: "read-back".into(),
            format,
            location: location.to_path_buf(),
            options,
            schema,
            mode: ExecutionMode::Batch,
        })
        .await
        .unwrap();
    dataset.frame().unwrap().rows().to_vec()
}

#[tokio::test]
async fn cast_job_writes_typed_output_and_schema() {
    let out = tempfile::tempdir().unwrap();
    let mut job = fixture_job("cast/job.json", DocumentFormat::Json, out.path()).unwrap();

    let registry = job.execute(&provider()).await.unwrap();

    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(
        registry.names(),
        &["extract-test", "transform-test", "load-test"].map(String::from)
    );
    let extracted = registry.get("extract-test").unwrap();
    assert!(
        extracted
            .schema()
            .fields()
            .iter()
            .all(|f| f.data_type == DataType::String)
    );

    let written = Schema::from_file(&out.path().join("schema_output.json")).unwrap();
    let types: Vec<(String, DataType)> = written
        .fields()
        .iter()
        .map(|f| (f.name.clone(), f.data_type))
        .collect();
    assert_eq!(
        types,
        vec![
            ("name".to_string(), DataType::String),
            ("age".to_string(), DataType::Integer),
            ("salary".to_string(), DataType::Double),
            ("active".to_string(), DataType::Boolean),
            ("joined".to_string(), DataType::Date),
        ]
    );

    let rows = read_back(
        &out.path().join("people"),
        DataFormat::Csv,
        Options::new().with("header", "true"),
        Some(written),
    )
    .await;
    assert_eq!(
        rows,
        vec![
            vec![json!("Alice"), json!(30), json!(5000.5), json!(true), json!("2020-01-15")],
            vec![json!("Bob"), Value::Null, json!(4200.0), json!(false), json!("2021-06-01")],
            vec![json!("Carol"), json!(41), Value::Null, json!(true), Value::Null],
        ]
    );
}

#[tokio::test]
async fn cast_job_overwrite_replaces_previous_output() {
    let out = tempfile::tempdir().unwrap();
    for _ in 0..2 {
        let mut job = fixture_job("cast/job.json", DocumentFormat::Json, out.path()).unwrap();
        job.execute(&provider()).await.unwrap();
    }
    let parts: Vec<_> = std::fs::read_dir(out.path().join("people"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("part-"))
        .collect();
    assert_eq!(parts, vec!["part-00000.csv"]);
}

#[test]
fn cast_job_with_unknown_upstream_fails_construction() {
    let out = tempfile::tempdir().unwrap();
    let mut value = fixture_value("cast/job.json", DocumentFormat::Json, out.path()).unwrap();
    // The untouched fixture builds.
    Job::from_value(&value).unwrap();

    value["transforms"][0]["upstream_name"] = json!("extract-missing");
    let err = Job::from_value(&value).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::UnknownUpstream { ref stage, ref upstream }
            if stage == "transform-test" && upstream == "extract-missing"
    ));
}

#[tokio::test]
async fn join_job_joins_and_projects() {
    let out = tempfile::tempdir().unwrap();
    let mut job = fixture_job("join/job.yaml", DocumentFormat::Yaml, out.path()).unwrap();
    assert_eq!(job.transforms()[0].upstream(), "extract-left");

    let registry = job.execute(&provider()).await.unwrap();

    let joined = registry.get("transform-join").unwrap();
    assert_eq!(joined.schema().field_names(), vec!["id", "name", "city", "country"]);
    assert_eq!(joined.frame().unwrap().num_rows(), 2);

    // JSON output columns come back in name order.
    let mut rows = read_back(&out.path().join("joined"), DataFormat::Json, Options::new(), None).await;
    rows.sort_by_key(|r| r[2].as_i64());
    assert_eq!(
        rows,
        vec![
            vec![json!("Paris"), json!("FR"), json!(1), json!("Alice")],
            vec![json!("Lima"), json!("PE"), json!(3), json!("Carol")],
        ]
    );
}

#[tokio::test]
async fn failed_extract_stops_the_job() {
    let out = tempfile::tempdir().unwrap();
    let mut job = Job::from_value(&json!({
        "extracts": [{
            "name": "extract-missing",
            "data_format": "csv",
            "location": out.path().join("nothing-here.csv")
        }],
        "loads": [{
            "name": "load",
            "upstream_name": "extract-missing",
            "data_format": "csv",
            "location": out.path().join("out")
        }]
    }))
    .unwrap();

    let err = job.execute(&provider()).await.unwrap_err();
    assert!(
        err.to_string()
            .starts_with("extract stage 'extract-missing' failed")
    );
    assert!(matches!(err, JobError::Stage { .. }));
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(!out.path().join("out").exists());
}

#[tokio::test]
async fn streaming_load_returns_running_query() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("events");
    let output = dir.path().join("sink");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(
        input.join("batch-1.json"),
        "{\"id\": 1, \"kind\": \"click\"}\n{\"id\": 2, \"kind\": \"view\"}\n",
    )
    .unwrap();
    std::fs::write(input.join("batch-2.json"), "{\"id\": 3, \"kind\": \"click\"}\n").unwrap();

    let mut job = Job::from_value(&json!({
        "extracts": [{
            "name": "extract-events",
            "method": "streaming",
            "data_format": "json",
            "location": input,
            "schema": {"type": "struct", "fields": [
                {"name": "id", "type": "long", "nullable": true, "metadata": {}},
                {"name": "kind", "type": "string", "nullable": true, "metadata": {}}
            ]}
        }],
        "transforms": [{
            "name": "transform-clicks",
            "method": "streaming",
            "upstream_name": "extract-events",
            "functions": [
                {"function": "filter", "arguments": {"condition": "kind = 'click'"}},
                {"function": "select", "arguments": {"columns": ["id"]}}
            ]
        }],
        "loads": [{
            "name": "load-clicks",
            "method": "streaming",
            "upstream_name": "transform-clicks",
            "data_format": "json",
            "location": output,
            "schema_location": dir.path().join("clicks_schema.json"),
            "options": {"trigger": "once"}
        }]
    }))
    .unwrap();

    let registry = job.execute(&provider()).await.unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert!(registry.get("load-clicks").unwrap().is_streaming());

    let query = registry.query("load-clicks").unwrap().clone();
    let status = query
        .await_termination_timeout(Duration::from_secs(10))
        .await
        .expect("query did not terminate")
        .unwrap();
    assert_eq!(status, QueryStatus::Finished);
    assert_eq!(query.progress().rows, 2);

    let schema = Schema::from_file(&dir.path().join("clicks_schema.json")).unwrap();
    assert_eq!(schema.field_names(), vec!["id"]);

    let mut rows = read_back(&output, DataFormat::Json, Options::new(), Some(schema)).await;
    rows.sort_by_key(|r| r[0].as_i64());
    assert_eq!(rows, vec![vec![json!(1)], vec![json!(3)]]);
}

#[tokio::test]
async fn streaming_query_runs_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("events");
    std::fs::create_dir_all(&input).unwrap();

    let mut job = Job::from_value(&json!({
        "extracts": [{
            "name": "extract-events",
            "method": "streaming",
            "data_format": "csv",
            "location": input,
            "schema": {"type": "struct", "fields": [
                {"name": "id", "type": "integer", "nullable": true, "metadata": {}}
            ]}
        }],
        "loads": [{
            "name": "load-events",
            "method": "streaming",
            "upstream_name": "extract-events",
            "data_format": "csv",
            "location": dir.path().join("sink"),
            "options": {"processingTime": "50 milliseconds"}
        }]
    }))
    .unwrap();

    let registry = job.execute(&provider()).await.unwrap();
    let queries = registry.into_queries();
    assert_eq!(queries.len(), 1);
    let (name, query) = &queries[0];
    assert_eq!(name, "load-events");
    assert!(query.is_active());

    assert_eq!(query.stop().await, QueryStatus::Stopped);
    assert!(!query.is_active());
}
