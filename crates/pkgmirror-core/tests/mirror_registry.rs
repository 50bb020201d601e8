//! Mirror runs against an in-process mock npm registry over real HTTP.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use pkgmirror_core::mirror::{FailureStage, OptionalPolicy, Outcome};
use pkgmirror_core::pkg::{
    LockSnapshot, PackageManifest, RegistryClient, TarballFetcher, TarballManifestReader,
};
use pkgmirror_core::{Mirror, MirrorConfig, SeedSet};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct MockRegistry {
    packuments: HashMap<String, Value>,
    tarballs: HashMap<String, Vec<u8>>,
}

impl MockRegistry {
    /// Publish a version whose packument lists `deps` and whose tarball
    /// embeds `embedded_deps`. `None` leaves the tarball unserved.
    fn publish(
        &mut self,
        base_url: &str,
        name: &str,
        version: &str,
        deps: Value,
        embedded_deps: Option<Value>,
    ) {
        let file = format!("{}-{version}.tgz", name.trim_start_matches('@').replace('/', "-"));
        let packument = self.packuments.entry(name.to_string()).or_insert_with(|| {
            json!({ "name": name, "dist-tags": {}, "versions": {} })
        });
        packument["dist-tags"]["latest"] = json!(version);
        packument["versions"][version] = json!({
            "name": name,
            "version": version,
            "dependencies": deps,
            "dist": { "tarball": format!("{base_url}/tarballs/{file}") }
        });

        if let Some(embedded) = embedded_deps {
            let pkg_json = json!({ "name": name, "version": version, "dependencies": embedded });
            self.tarballs.insert(file, tgz(&pkg_json.to_string()));
        }
    }
}

fn tgz(pkg_json: &str) -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        let mut header = tar::Header::new_gnu();
        header.set_path("package/package.json").unwrap();
        header.set_size(pkg_json.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, pkg_json.as_bytes()).unwrap();
        builder.finish().unwrap();
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

async fn packument(Path(name): Path<String>, State(reg): State<Arc<MockRegistry>>) -> Response {
    match reg.packuments.get(&name) {
        Some(doc) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            doc.to_string(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn tarball(Path(file): Path<String>, State(reg): State<Arc<MockRegistry>>) -> Response {
    match reg.tarballs.get(&file) {
        Some(bytes) => (StatusCode::OK, Body::from(bytes.clone())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve(setup: impl FnOnce(&str, &mut MockRegistry)) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let mut reg = MockRegistry::default();
    setup(&base_url, &mut reg);

    let app = Router::new()
        .route("/:name", get(packument))
        .route("/tarballs/:file", get(tarball))
        .with_state(Arc::new(reg));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base_url
}

fn mirror_for(base_url: &str, config: MirrorConfig) -> Mirror {
    let registry = RegistryClient::with_timeout(base_url, Duration::from_secs(10)).unwrap();
    Mirror::new(
        config.with_retries(0),
        Arc::new(registry.clone()),
        Arc::new(TarballFetcher::new(registry)),
        Arc::new(TarballManifestReader),
    )
    .with_registry_url(base_url)
}

fn seeds(deps: Value) -> SeedSet {
    let manifest = PackageManifest::from_value(&json!({ "dependencies": deps })).unwrap();
    SeedSet::from_manifest(&manifest)
}

fn keys(report: &pkgmirror_core::MirrorReport) -> Vec<String> {
    report.closure.iter().map(|id| id.key()).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_closure_downloaded_over_http() {
    let base = serve(|base, reg| {
        reg.publish(base, "a", "1.0.0", json!({ "b": "^2.0.0" }), Some(json!({ "b": "^2.0.0" })));
        reg.publish(base, "b", "2.0.0", json!({}), Some(json!({})));
        reg.publish(base, "b", "2.5.1", json!({}), Some(json!({})));
        reg.publish(base, "@types/x", "3.0.0", json!({}), Some(json!({})));
    })
    .await;
    let out = TempDir::new().unwrap();

    let report = mirror_for(&base, MirrorConfig::new(out.path()))
        .run(&seeds(json!({ "a": "^1.0.0", "@types/x": "*" })))
        .await
        .unwrap();

    assert_eq!(keys(&report), vec!["@types/x@3.0.0", "a@1.0.0", "b@2.5.1"]);
    assert_eq!(report.outcome(), Outcome::Ok);
    assert_eq!(report.summary.downloaded, 3);
    assert_eq!(report.summary.extra_rounds, 0);
    assert!(out.path().join("@types").join("x-3.0.0.tgz").is_file());
    assert!(report
        .artifacts
        .iter()
        .all(|a| a.present && a.digest.as_ref().is_some_and(|d| d.len() == 64)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_embedded_manifest_adds_hidden_dependency() {
    // The packument omits `hidden`; only the archive declares it
    let base = serve(|base, reg| {
        reg.publish(base, "a", "1.0.0", json!({}), Some(json!({ "hidden": "1.x" })));
        reg.publish(base, "hidden", "1.2.0", json!({}), Some(json!({})));
    })
    .await;
    let out = TempDir::new().unwrap();

    let report = mirror_for(&base, MirrorConfig::new(out.path()))
        .run(&seeds(json!({ "a": "1.0.0" })))
        .await
        .unwrap();

    assert_eq!(keys(&report), vec!["a@1.0.0", "hidden@1.2.0"]);
    assert_eq!(report.summary.extra_rounds, 1);
    assert!(out.path().join("hidden-1.2.0.tgz").is_file());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_tarball_recorded_and_rerun_skips() {
    let base = serve(|base, reg| {
        reg.publish(base, "a", "1.0.0", json!({ "gone": "1.0.0" }), Some(json!({ "gone": "1.0.0" })));
        reg.publish(base, "gone", "1.0.0", json!({}), None);
    })
    .await;
    let out = TempDir::new().unwrap();
    let mirror = mirror_for(&base, MirrorConfig::new(out.path()));
    let seed = seeds(json!({ "a": "^1" }));

    let first = mirror.run(&seed).await.unwrap();
    assert_eq!(first.outcome(), Outcome::Partial);
    let failures: Vec<_> = first.failures_in(FailureStage::Download).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subject, "gone@1.0.0");

    let second = mirror.run(&seed).await.unwrap();
    assert_eq!(second.summary.downloaded, 0);
    assert_eq!(second.summary.skipped, 1);
    assert_eq!(second.summary.failed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lockfile_pins_exact_versions() {
    let base = serve(|base, reg| {
        reg.publish(base, "a", "1.0.0", json!({}), Some(json!({})));
        reg.publish(base, "a", "1.9.0", json!({}), Some(json!({})));
    })
    .await;
    let out = TempDir::new().unwrap();
    let lock = LockSnapshot::from_json_str(
        r#"{
            "lockfileVersion": 3,
            "packages": {
                "": { "name": "app" },
                "node_modules/a": { "version": "1.0.0" }
            }
        }"#,
    )
    .unwrap();

    let report = mirror_for(&base, MirrorConfig::new(out.path()))
        .run(&SeedSet::new().with_lockfile(&lock))
        .await
        .unwrap();

    assert_eq!(keys(&report), vec!["a@1.0.0"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_optional_excluded() {
    let base = serve(|base, reg| {
        reg.publish(base, "a", "1.0.0", json!({}), Some(json!({})));
        reg.publish(base, "fsevents", "2.3.3", json!({}), Some(json!({})));
    })
    .await;
    let out = TempDir::new().unwrap();
    let manifest = PackageManifest::from_value(&json!({
        "dependencies": { "a": "1.0.0" },
        "optionalDependencies": { "fsevents": "^2" }
    }))
    .unwrap();

    let report = mirror_for(
        &base,
        MirrorConfig::new(out.path()).with_optional(OptionalPolicy::Exclude),
    )
    .run(&SeedSet::from_manifest(&manifest))
    .await
    .unwrap();

    assert_eq!(keys(&report), vec!["a@1.0.0"]);
    assert!(!out.path().join("fsevents-2.3.3.tgz").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_tarball_is_not_written() {
    let base = serve(|base, reg| {
        reg.publish(base, "a", "1.0.0", json!({}), Some(json!({})));
    })
    .await;
    let out = TempDir::new().unwrap();
    let registry = RegistryClient::with_timeout(&base, Duration::from_secs(10)).unwrap();
    let mirror = Mirror::new(
        MirrorConfig::new(out.path()).with_retries(0),
        Arc::new(registry.clone()),
        Arc::new(TarballFetcher::new(registry).with_max_bytes(8)),
        Arc::new(TarballManifestReader),
    );

    let report = mirror.run(&seeds(json!({ "a": "1.0.0" }))).await.unwrap();

    let failures: Vec<_> = report.failures_in(FailureStage::Download).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subject, "a@1.0.0");
    assert!(!out.path().join("a-1.0.0.tgz").exists());
}
