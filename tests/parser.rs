use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use jsonnet_sandbox::config::JSONNET_PATH;
use jsonnet_sandbox::diagnostic::{format_error, DiagnosticOptions};
use jsonnet_sandbox::{EvalErrorKind, MemoryFileSystem, ParseError, Parser, ResolveError};
use serde::Deserialize;
use tempfile::TempDir;

/// Serializes tests that change the working directory or the environment.
static CWD_TEST_LOCK: Mutex<()> = Mutex::new(());

/// Switches the working directory and restores it on drop.
struct WorkingDir {
    previous: PathBuf,
}

impl WorkingDir {
    fn enter(dir: &Path) -> Self {
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        Self { previous }
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.previous);
    }
}

fn write(dir: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

fn workspace() -> (TempDir, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("project");
    fs::create_dir_all(&base).unwrap();
    (tmp, base)
}

fn parser(base: &Path) -> Parser {
    Parser::builder().base_dir(base).build()
}

#[test]
fn nested_imports_three_levels_deep() {
    let (_tmp, base) = workspace();
    write(&base, "a.libsonnet", "{ a: 'a', b: import 'lib/b.libsonnet' }");
    write(&base, "lib/b.libsonnet", "{ b: 'b', c: import 'c.libsonnet' }");
    write(&base, "lib/c.libsonnet", "{ c: 'c' }");

    let parsed = parser(&base)
        .unmarshal_with_deps::<serde_json::Value>(b"import 'a.libsonnet'")
        .unwrap();

    assert_eq!(
        parsed.value,
        serde_json::json!({ "a": "a", "b": { "b": "b", "c": { "c": "c" } } })
    );
    assert_eq!(
        parsed.dependencies,
        vec![
            base.join("a.libsonnet"),
            base.join("lib/b.libsonnet"),
            base.join("lib/c.libsonnet")
        ]
    );
}

#[test]
fn relative_escape_is_denied() {
    let (tmp, base) = workspace();
    write(tmp.path(), "outside.libsonnet", "{ secret: true }");

    let err = parser(&base)
        .unmarshal::<serde_json::Value>(b"import '../outside.libsonnet'")
        .unwrap_err();

    assert!(err.resolve_error().is_some_and(|e| e.is_access_denied()));
    assert!(
        err.to_string()
            .contains("access denied: ../outside.libsonnet is outside of allowed directories"),
        "{err}"
    );
}

#[test]
fn absolute_escape_is_denied() {
    let (_tmp, base) = workspace();
    let err = parser(&base)
        .unmarshal::<serde_json::Value>(b"{ x: importstr '/foo/bar/baz' }")
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("access denied: /foo/bar/baz is outside of allowed directories")
    );
}

#[test]
fn missing_import_is_an_evaluation_error() {
    let (_tmp, base) = workspace();
    let err = parser(&base)
        .unmarshal::<serde_json::Value>(b"import 'nope.libsonnet'")
        .unwrap_err();

    let ParseError::Evaluation(eval) = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(matches!(eval.kind(), EvalErrorKind::ImportNotFound { .. }));
    assert!(err.resolve_error().is_none());
}

#[test]
fn library_path_outside_base_is_allowed() {
    let (tmp, base) = workspace();
    let vendor = tmp.path().join("vendor");
    write(&vendor, "k8s.libsonnet", "{ apiVersion: 'v1' }");

    let parser = Parser::builder()
        .base_dir(&base)
        .library_path(&vendor)
        .build();
    let value: serde_json::Value = parser
        .unmarshal(b"(import 'k8s.libsonnet') { kind: 'Service' }")
        .unwrap();
    assert_eq!(value, serde_json::json!({ "apiVersion": "v1", "kind": "Service" }));
}

#[test]
fn typed_target() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Deployment {
        name: String,
        replicas: u32,
        labels: std::collections::BTreeMap<String, String>,
    }

    let (_tmp, base) = workspace();
    write(&base, "defaults.libsonnet", "{ replicas: 1, labels: { team: 'core' } }");

    let deployment: Deployment = parser(&base)
        .unmarshal(br#"
            local defaults = import 'defaults.libsonnet';
            defaults + { name: 'api', replicas: defaults.replicas * 3 }
        "#)
        .unwrap();

    assert_eq!(deployment.name, "api");
    assert_eq!(deployment.replicas, 3);
    assert_eq!(deployment.labels["team"], "core");
}

#[test]
fn unmarshal_file_resolves_next_to_the_file() {
    let (_tmp, base) = workspace();
    write(&base, "env/prod/main.jsonnet", "{ region: import 'region.libsonnet' }");
    write(&base, "env/prod/region.libsonnet", "'eu-west-1'");

    let parsed = parser(&base)
        .unmarshal_file::<serde_json::Value>("env/prod/main.jsonnet")
        .unwrap();
    assert_eq!(parsed.value, serde_json::json!({ "region": "eu-west-1" }));
}

#[test]
fn errors_render_with_source_context() {
    let (_tmp, base) = workspace();
    write(&base, "broken.libsonnet", "{\n  port: 80 + 'x' - 1,\n}");

    let err = parser(&base)
        .unmarshal::<serde_json::Value>(b"import 'broken.libsonnet'")
        .unwrap_err();
    let eval = err.eval_error().unwrap();
    let text = format_error(eval, &DiagnosticOptions::plain());

    assert!(text.starts_with("error: binary operator - does not operate on string and number\n"));
    assert!(text.contains("broken.libsonnet:2:"));
    assert!(text.contains("2 │   port: 80 + 'x' - 1,"));
}

#[test]
fn default_parser_is_rooted_at_working_directory() {
    let _guard = CWD_TEST_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let (tmp, base) = workspace();
    write(&base, "settings.libsonnet", "{ debug: false }");
    write(&base, "banner.txt", "hello");
    write(tmp.path(), "outside.libsonnet", "{ secret: true }");
    let _cwd = WorkingDir::enter(&base);

    let value: serde_json::Value = Parser::new()
        .unmarshal(b"{ settings: import 'settings.libsonnet', banner: importstr 'banner.txt' }")
        .unwrap();
    assert_eq!(
        value,
        serde_json::json!({ "settings": { "debug": false }, "banner": "hello" })
    );

    let err = Parser::new()
        .unmarshal::<serde_json::Value>(b"importstr '/foo/bar/baz'")
        .unwrap_err();
    assert!(err.resolve_error().is_some_and(ResolveError::is_access_denied));

    let err = Parser::new()
        .unmarshal::<serde_json::Value>(b"import '../outside.libsonnet'")
        .unwrap_err();
    assert!(err.resolve_error().is_some_and(ResolveError::is_access_denied));
}

#[test]
fn environment_does_not_widen_default_roots() {
    let _guard = CWD_TEST_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let (tmp, base) = workspace();
    let elsewhere = tmp.path().join("elsewhere");
    write(&elsewhere, "leak.libsonnet", "{ leaked: true }");
    let _cwd = WorkingDir::enter(&base);

    // SAFETY: tests touching the environment hold CWD_TEST_LOCK.
    unsafe { std::env::set_var(JSONNET_PATH, &elsewhere) };
    let parser = Parser::new();
    let roots = parser.roots();
    let result = parser.unmarshal::<serde_json::Value>(b"import 'leak.libsonnet'");
    // SAFETY: as above.
    unsafe { std::env::remove_var(JSONNET_PATH) };

    let cwd = std::env::current_dir().unwrap();
    assert_eq!(roots.unwrap().library(), [cwd].as_slice());
    let err = result.unwrap_err();
    let ParseError::Evaluation(eval) = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(matches!(eval.kind(), EvalErrorKind::ImportNotFound { .. }));
}

#[test]
fn io_failure_surfaces_as_resolver_error() {
    let mut fs = MemoryFileSystem::new();
    fs.insert("/work/locked.libsonnet", "{}");
    fs.insert_failure("/work/locked.libsonnet", io::ErrorKind::PermissionDenied);
    let parser = Parser::builder()
        .base_dir("/work")
        .file_system(Arc::new(fs))
        .build();

    let err = parser
        .unmarshal::<serde_json::Value>(b"import 'locked.libsonnet'")
        .unwrap_err();

    assert!(matches!(err, ParseError::Evaluation(_)), "{err}");
    let Some(ResolveError::Io { path, source }) = err.resolve_error() else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(path, Path::new("/work/locked.libsonnet"));
    assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
    assert!(err.to_string().contains("read /work/locked.libsonnet:"), "{err}");
}

#[test]
fn inheritance_with_self() {
    let (_tmp, base) = workspace();
    let value: serde_json::Value = parser(&base)
        .unmarshal(
            br#"
            {
              person1: {
                name: "Alice",
                welcome: "Hello " + self.name + "!",
              },
              person2: self.person1 { name: "Bob" },
            }
            "#,
        )
        .unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "person1": { "name": "Alice", "welcome": "Hello Alice!" },
            "person2": { "name": "Bob", "welcome": "Hello Bob!" },
        })
    );
}

#[test]
fn library_helpers_and_std() {
    let (_tmp, base) = workspace();
    write(
        &base,
        "util.libsonnet",
        "{ labels(app, extra={}):: { app: app } + extra, ports(list):: [{ port: p } for p in std.sort(list)] }",
    );
    let value: serde_json::Value = parser(&base)
        .unmarshal(
            br#"
            local util = import 'util.libsonnet';
            {
              metadata: { labels: util.labels('api', extra={ tier: 'web' }) },
              ports: util.ports([443, 80]),
              name: std.join('-', ['api', std.toString(2)]),
            }
            "#,
        )
        .unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "metadata": { "labels": { "app": "api", "tier": "web" } },
            "ports": [{ "port": 80 }, { "port": 443 }],
            "name": "api-2",
        })
    );
}

#[test]
fn deeply_nested_input_is_rejected() {
    let (_tmp, base) = workspace();
    let data = format!("{}1{}", "[".repeat(3000), "]".repeat(3000));
    let err = parser(&base)
        .unmarshal::<serde_json::Value>(data.as_bytes())
        .unwrap_err();
    assert!(err.to_string().contains("max nesting depth exceeded"), "{err}");
}
