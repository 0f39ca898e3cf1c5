//! End-to-end build pipeline tests against a local store in a tempdir.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use modelpack::archive::CancelFlag;
use modelpack::build::Builder;
use modelpack::config::BuildConfig;
use modelpack::modelfile::Modelfile;
use modelpack::oci::{self, Manifest, ModelConfig};
use modelpack::store::LocalStore;

const TARGET: &str = "models/test:v1";

fn fixed_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let files: [(&str, &[u8]); 7] = [
        ("config.json", br#"{"model_type":"llama"}"#),
        ("weights/model-00001-of-00002.bin", &[1u8; 4096]),
        ("weights/model-00002-of-00002.bin", &[2u8; 1500]),
        ("convert.py", b"print('convert')\n"),
        ("README.md", b"# test model\n"),
        ("LICENSE", b"Apache-2.0\n"),
        (".git/config", b"[core]\n"),
    ];
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    fs::write(
        dir.path().join("Modelfile"),
        "NAME test-model\nARCH transformer\nFAMILY llama\nFORMAT safetensors\nPARAMSIZE 7B\nPRECISION float16\nCONFIG config.json\nMODEL *.bin\nCODE convert.py\nDOC README.md\n",
    )
    .unwrap();
    dir
}

fn build_config(concurrency: usize) -> BuildConfig {
    BuildConfig {
        concurrency,
        target: TARGET.to_string(),
        ..Default::default()
    }
}

async fn build_once(store: Arc<LocalStore>, workdir: &Path, concurrency: usize) -> oci::Descriptor {
    Builder::new(store)
        .with_clock(fixed_clock())
        .build(workdir, &build_config(concurrency))
        .await
        .unwrap()
}

fn read_blob(store: &LocalStore, digest: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    store.pull(digest).unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}

fn read_manifest(store: &LocalStore, digest: &str) -> Manifest {
    serde_json::from_slice(&read_blob(store, digest)).unwrap()
}

fn count_files(dir: &Path) -> usize {
    let mut count = 0;
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        if entry.file_type().unwrap().is_dir() {
            count += count_files(&entry.path());
        } else {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn test_build_produces_tagged_manifest() {
    let ws = workspace();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let desc = build_once(store.clone(), ws.path(), 4).await;
    assert_eq!(desc.media_type, oci::MEDIA_TYPE_IMAGE_MANIFEST);

    // The manifest is the only object reachable by tag.
    let resolved = store.resolve_tag("models/test", "v1").unwrap();
    assert_eq!(resolved, desc.digest);

    let manifest = read_manifest(&store, &desc.digest);
    assert_eq!(manifest.schema_version, 2);
    assert_eq!(manifest.config.media_type, oci::MEDIA_TYPE_MODEL_CONFIG);

    // config.json, two weights, convert.py, README (doc + readme), LICENSE.
    assert_eq!(manifest.layers.len(), 7);

    let paths: Vec<&str> = manifest
        .layers
        .iter()
        .map(|l| l.filepath().unwrap())
        .collect();
    assert_eq!(
        paths,
        [
            "LICENSE",
            "README.md",
            "README.md",
            "config.json",
            "convert.py",
            "weights/model-00001-of-00002.bin",
            "weights/model-00002-of-00002.bin",
        ]
    );

    // Layers are sorted by filepath annotation.
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);

    // Category markers.
    let config_layer = &manifest.layers[3];
    assert_eq!(config_layer.media_type, oci::MEDIA_TYPE_MODEL_WEIGHT_CONFIG);
    assert_eq!(
        config_layer.annotations.get(oci::ANNOTATION_CONFIG).map(String::as_str),
        Some("true")
    );
    let license_layer = &manifest.layers[0];
    assert_eq!(
        license_layer.annotations.get(oci::ANNOTATION_LICENSE).map(String::as_str),
        Some("true")
    );
    let weight_layer = &manifest.layers[5];
    assert_eq!(weight_layer.media_type, oci::MEDIA_TYPE_MODEL_WEIGHT);
    assert_eq!(
        weight_layer.annotations.get(oci::ANNOTATION_MODEL).map(String::as_str),
        Some("true")
    );

    // The README file is claimed by both the doc processor and the readme
    // default; same bytes, same digest, different annotations.
    assert_eq!(manifest.layers[1].digest, manifest.layers[2].digest);
    assert!(
        manifest.layers[1].annotations.contains_key(oci::ANNOTATION_README)
            != manifest.layers[2].annotations.contains_key(oci::ANNOTATION_README)
    );

    // Hidden files never surface in descriptors.
    assert!(paths.iter().all(|p| !p.contains(".git")));
}

#[tokio::test]
async fn test_config_diff_ids_align_with_manifest_layers() {
    let ws = workspace();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let desc = build_once(store.clone(), ws.path(), 2).await;
    let manifest = read_manifest(&store, &desc.digest);
    let config: ModelConfig =
        serde_json::from_slice(&read_blob(&store, &manifest.config.digest)).unwrap();

    assert_eq!(config.descriptor.name, "test-model");
    assert_eq!(config.descriptor.family, "llama");
    assert_eq!(config.descriptor.created_at, fixed_clock());
    assert_eq!(config.config.architecture, "transformer");
    assert_eq!(config.config.format, "safetensors");
    assert_eq!(config.config.param_size, "7B");
    assert_eq!(config.config.precision, "float16");
    assert_eq!(config.modelfs.fs_type, "layers");

    let layer_digests: Vec<&str> = manifest.layers.iter().map(|l| l.digest.as_str()).collect();
    assert_eq!(config.modelfs.diff_ids, layer_digests);
}

#[tokio::test]
async fn test_layer_digests_and_sizes_match_streams() {
    let ws = workspace();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let desc = build_once(store.clone(), ws.path(), 3).await;
    let manifest = read_manifest(&store, &desc.digest);

    for layer in &manifest.layers {
        let bytes = read_blob(&store, &layer.digest);
        assert_eq!(bytes.len() as u64, layer.size);
        assert_eq!(oci::sha256_digest(&bytes), layer.digest);
        // Uncompressed single-member tar: header block, padded content,
        // two-block trailer.
        assert_eq!(layer.size % 512, 0);
        assert!(layer.size >= 512 + 1024);
    }
}

#[tokio::test]
async fn test_builds_are_deterministic_across_concurrency() {
    let ws = workspace();

    let mut digests = Vec::new();
    let mut bodies = Vec::new();
    for concurrency in [1, 4, 8] {
        let store_dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());
        let desc = build_once(store.clone(), ws.path(), concurrency).await;
        bodies.push(read_blob(&store, &desc.digest));
        digests.push(desc.digest);
    }

    assert_eq!(digests[0], digests[1]);
    assert_eq!(digests[1], digests[2]);
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
}

#[tokio::test]
async fn test_rebuild_into_primed_store_pushes_nothing_new() {
    let ws = workspace();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let first = build_once(store.clone(), ws.path(), 4).await;
    let blobs_before = count_files(&store_dir.path().join("blobs"));

    let second = build_once(store.clone(), ws.path(), 4).await;
    let blobs_after = count_files(&store_dir.path().join("blobs"));

    assert_eq!(first.digest, second.digest);
    assert_eq!(blobs_before, blobs_after);
}

#[tokio::test]
async fn test_manifest_carries_rendered_modelfile() {
    let ws = workspace();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let desc = build_once(store.clone(), ws.path(), 2).await;
    let manifest = read_manifest(&store, &desc.digest);

    let text = manifest.annotations.get(oci::ANNOTATION_MODELFILE).unwrap();
    assert!(text.starts_with("# Generated at 2025-01-01T00:00:00Z"));

    let round_tripped = Modelfile::parse(text).unwrap();
    assert_eq!(round_tripped.name(), "test-model");
    assert_eq!(round_tripped.family(), "llama");
    assert!(round_tripped.models().contains("*.bin"));
}

#[tokio::test]
async fn test_build_requires_tag() {
    let ws = workspace();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let mut cfg = build_config(2);
    cfg.target = "models/test".to_string();
    let err = Builder::new(store).build(ws.path(), &cfg).await.unwrap_err();
    assert_eq!(err.to_string(), "tag is required");
}

#[tokio::test]
async fn test_build_surfaces_modelfile_parse_errors() {
    let ws = workspace();
    fs::write(ws.path().join("Modelfile"), "NAME a\nNAME b\n").unwrap();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let err = Builder::new(store)
        .build(ws.path(), &build_config(2))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to parse modelfile: duplicate name command on line 2"
    );
}

#[tokio::test]
async fn test_build_fails_on_missing_modelfile() {
    let ws = TempDir::new().unwrap();
    fs::write(ws.path().join("model.bin"), "x").unwrap();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let err = Builder::new(store)
        .build(ws.path(), &build_config(2))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("failed to parse modelfile:"));
}

#[tokio::test]
async fn test_cancelled_build_returns_cancellation() {
    let ws = workspace();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let cancel = CancelFlag::default();
    cancel.cancel();

    let err = Builder::new(store)
        .with_cancel(cancel)
        .build(ws.path(), &build_config(2))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_nydusify_rewrites_layer_descriptors() {
    let ws = workspace();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let mut cfg = build_config(2);
    cfg.nydusify = true;
    let desc = Builder::new(store.clone())
        .with_clock(fixed_clock())
        .build(ws.path(), &cfg)
        .await
        .unwrap();

    let manifest = read_manifest(&store, &desc.digest);
    for layer in &manifest.layers {
        assert_eq!(layer.media_type, oci::MEDIA_TYPE_NYDUS_BLOB);
        assert_eq!(
            layer.annotations.get(oci::ANNOTATION_NYDUS_BLOB).map(String::as_str),
            Some("true")
        );
        assert!(layer.filepath().is_some());
    }
}

#[tokio::test]
async fn test_prune_after_retag_reclaims_orphans() {
    let ws = workspace();
    let store_dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()).unwrap());

    let first = build_once(store.clone(), ws.path(), 2).await;

    // A changed workspace rebuilt under the same tag orphans the old
    // manifest and any layers only it referenced.
    fs::write(ws.path().join("weights/model-00001-of-00002.bin"), [9u8; 4096]).unwrap();
    let second = build_once(store.clone(), ws.path(), 2).await;
    assert_ne!(first.digest, second.digest);

    let removed = store.prune().unwrap();
    assert!(removed.contains(&first.digest));
    assert!(!store.exists(&first.digest).unwrap());

    // Everything the current tag references survives.
    let manifest = read_manifest(&store, &second.digest);
    assert!(store.exists(&manifest.config.digest).unwrap());
    for layer in &manifest.layers {
        assert!(store.exists(&layer.digest).unwrap());
    }
}
