use satchel_core::{
    usage_closure, ContentValidator, CoreError, Engine, PackageValidator, SatchelConfig,
};
use satchel_schema::{parse_manifest_str, parse_semantics, LibraryIdentity, LibraryRecord};
use satchel_store::{MemoryStorage, StorageProvider};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn library_json(name: &str, deps: &str) -> String {
    format!(
        r#"{{"title": "{name}", "machineName": "{name}", "majorVersion": 1, "minorVersion": 0,
            "patchVersion": 0, "runnable": 1, "preloadedDependencies": [{deps}]}}"#
    )
}

fn package_with_dependency(dep: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "h5p.json",
        r#"{"title": "Slides", "language": "en", "mainLibrary": "H5P.Slides", "embedTypes": ["div"],
            "preloadedDependencies": [{"machineName": "H5P.Slides", "majorVersion": 1, "minorVersion": 0}]}"#,
    );
    write(root, "content/content.json", r#"{"slides": []}"#);
    write(
        root,
        "H5P.Slides-1.0/library.json",
        &library_json(
            "H5P.Slides",
            &format!(r#"{{"machineName": "{dep}", "majorVersion": 1, "minorVersion": 0}}"#),
        ),
    );
    write(
        root,
        "H5P.Slides-1.0/semantics.json",
        r#"[{"name": "slides", "type": "list", "field": {"name": "slide", "type": "text"}}]"#,
    );
    dir
}

fn record(name: &str, deps: &str) -> LibraryRecord {
    LibraryRecord::from_manifest(parse_manifest_str(&library_json(name, deps)).unwrap()).unwrap()
}

#[test]
fn undeclared_dependency_fails_the_package() {
    let pkg = package_with_dependency("H5P.Nowhere");
    let provider = MemoryStorage::new();
    let report = PackageValidator::new(&provider, &SatchelConfig::default())
        .validate(pkg.path())
        .unwrap();

    assert!(!report.is_valid());
    assert!(report.package.is_none());
    let messages: Vec<String> = report
        .verdict
        .diagnostics
        .iter()
        .map(ToString::to_string)
        .collect();
    assert!(
        messages
            .iter()
            .any(|m| m.contains("missing required library H5P.Nowhere 1.0")),
        "{messages:?}"
    );
}

#[test]
fn installed_dependency_satisfies_the_package() {
    let pkg = package_with_dependency("H5P.Shared");
    let provider = MemoryStorage::new().with_library(record("H5P.Shared", ""));
    let report = PackageValidator::new(&provider, &SatchelConfig::default())
        .validate(pkg.path())
        .unwrap();
    assert!(report.is_valid(), "{:?}", report.verdict.diagnostics);
    assert!(report.missing.is_empty());
}

#[test]
fn content_properties_hold() {
    let provider = MemoryStorage::new();
    let semantics = parse_semantics(
        &json!([
            {"name": "clamped", "type": "number", "min": 0, "max": 5},
            {"name": "junk", "type": "number"},
            {"name": "stepped", "type": "number", "min": 0, "step": 3},
            {"name": "html", "type": "text", "widget": "html", "tags": ["b"]},
            {"name": "mode", "type": "select", "options": [{"value": "a"}, {"value": "b"}]},
            {"name": "known", "type": "number"}
        ])
        .to_string(),
    )
    .unwrap();

    let report = ContentValidator::new(&provider).validate(
        json!({
            "clamped": 7,
            "junk": "abc",
            "stepped": 4,
            "html": "<script>x</script>hi",
            "mode": "z",
            "known": 1,
            "rogue": 2
        }),
        &semantics,
    );
    assert_eq!(
        report.params,
        json!({"clamped": 5, "junk": 0, "stepped": 3, "html": "hi", "mode": "a", "known": 1})
    );
    let contexts: Vec<&str> = report
        .diagnostics
        .iter()
        .map(|d| d.context.as_str())
        .collect();
    assert!(contexts.contains(&"mode"));
    assert!(contexts.contains(&"rogue"));
    assert!(!report.diagnostics.has_errors());
}

#[test]
fn closure_keeps_preloaded_over_dynamic() {
    let main = parse_manifest_str(
        r#"{"machineName": "Main", "majorVersion": 1, "minorVersion": 0, "patchVersion": 0,
            "preloadedDependencies": [{"machineName": "Lib", "majorVersion": 1, "minorVersion": 0}],
            "dynamicDependencies": [{"machineName": "Lib", "majorVersion": 1, "minorVersion": 0}]}"#,
    )
    .unwrap();
    let provider = MemoryStorage::new().with_library(record("Lib", ""));
    let closure = usage_closure(&provider, &main).unwrap();
    assert!(closure["Lib"].preloaded);
    assert_eq!(closure, usage_closure(&provider, &main).unwrap());
}

#[test]
fn library_string_folder_form_round_trips() {
    let id = LibraryIdentity::parse("foo.bar-1.2").unwrap();
    assert_eq!(id, LibraryIdentity::new("foo.bar", 1, 2));
    assert_eq!(id.folder_name(), "foo.bar-1.2");
}

#[test]
fn concurrent_installs_never_interleave() {
    let store = tempfile::tempdir().unwrap();
    let config = SatchelConfig::default().with_store(store.path());

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let pkg = package_with_dependency("H5P.Shared");
                write(pkg.path(), "H5P.Shared-1.0/library.json", &library_json("H5P.Shared", ""));
                let engine = Engine::open(config).unwrap();
                barrier.wait();
                engine.install(pkg.path())
            })
        })
        .collect();

    let mut installed = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(report) => {
                assert!(report.is_installed(), "{:?}", report.verdict.diagnostics);
                installed += 1;
            }
            Err(CoreError::Locked) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(installed >= 1);

    let engine = Engine::open(config).unwrap();
    let libraries = engine.list_libraries().unwrap();
    assert_eq!(libraries.len(), 2);
    let slides = LibraryIdentity::new("H5P.Slides", 1, 0);
    assert!(engine.provider().installed_library(&slides).unwrap().is_some());
}
