// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Binary transfer pipeline tests against recording fakes.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use mz_migration_transfer::{
    BinaryStream, CharmDownloader, CharmUploader, ResourceDownloader, ResourceRevision,
    ResourceUploader, SeekableStream, SerializedModelResource, ToolsDownloader, ToolsUploader,
    UploadBinariesConfig, UploadError, UploadedTools, upload_binaries,
};

type Log = Arc<Mutex<Vec<String>>>;

fn push(log: &Log, entry: String) {
    log.lock().unwrap().push(entry);
}

async fn slurp(content: &mut dyn SeekableStream) -> String {
    let mut bytes = Vec::new();
    content.read_to_end(&mut bytes).await.unwrap();
    String::from_utf8(bytes).unwrap()
}

#[derive(Default)]
struct FakeCharms {
    log: Log,
    /// Reference the uploader claims to have assigned, overriding the
    /// requested one.
    assign: Option<String>,
    fail_open: bool,
}

#[async_trait]
impl CharmDownloader for FakeCharms {
    async fn open_charm(&self, charm_ref: &str) -> anyhow::Result<BinaryStream> {
        push(&self.log, format!("open-charm {charm_ref}"));
        if self.fail_open {
            anyhow::bail!("blobstore unavailable");
        }
        Ok(Box::new(Cursor::new(format!("charm:{charm_ref}").into_bytes())) as BinaryStream)
    }
}

#[async_trait]
impl CharmUploader for FakeCharms {
    async fn upload_charm(
        &self,
        charm_ref: &str,
        content: &mut dyn SeekableStream,
    ) -> anyhow::Result<String> {
        let body = slurp(content).await;
        push(&self.log, format!("upload-charm {charm_ref} [{body}]"));
        Ok(self.assign.clone().unwrap_or_else(|| charm_ref.to_string()))
    }
}

#[derive(Default)]
struct FakeTools {
    log: Log,
    fail_upload: bool,
}

#[async_trait]
impl ToolsDownloader for FakeTools {
    async fn open_uri(
        &self,
        uri: &str,
        query: &[(String, String)],
    ) -> anyhow::Result<BinaryStream> {
        assert!(query.is_empty());
        push(&self.log, format!("open-tools {uri}"));
        Ok(Box::new(Cursor::new(format!("tools:{uri}").into_bytes())) as BinaryStream)
    }
}

#[async_trait]
impl ToolsUploader for FakeTools {
    async fn upload_tools(
        &self,
        content: &mut dyn SeekableStream,
        version: &str,
    ) -> anyhow::Result<Vec<UploadedTools>> {
        if self.fail_upload {
            anyhow::bail!("target rejected tools");
        }
        let body = slurp(content).await;
        push(&self.log, format!("upload-tools {version} [{body}]"));
        Ok(vec![UploadedTools {
            version: version.to_string(),
            url: format!("https://target/tools/{version}"),
            sha256: String::new(),
            size: body.len() as u64,
        }])
    }
}

#[derive(Default)]
struct FakeResources {
    log: Log,
}

#[async_trait]
impl ResourceDownloader for FakeResources {
    async fn open_resource(&self, application: &str, name: &str) -> anyhow::Result<BinaryStream> {
        push(&self.log, format!("open-resource {application}/{name}"));
        Ok(Box::new(Cursor::new(
            format!("resource:{application}/{name}").into_bytes(),
        )) as BinaryStream)
    }
}

#[async_trait]
impl ResourceUploader for FakeResources {
    async fn upload_resource(
        &self,
        revision: &ResourceRevision,
        content: &mut dyn SeekableStream,
    ) -> anyhow::Result<()> {
        let body = slurp(content).await;
        push(
            &self.log,
            format!(
                "upload-resource {}/{} rev={:?} [{body}]",
                revision.application, revision.name, revision.revision
            ),
        );
        Ok(())
    }

    async fn set_placeholder_resource(&self, revision: &ResourceRevision) -> anyhow::Result<()> {
        push(
            &self.log,
            format!(
                "set-placeholder {}/{}",
                revision.application, revision.name
            ),
        );
        Ok(())
    }

    async fn set_unit_resource(
        &self,
        unit: &str,
        revision: &ResourceRevision,
    ) -> anyhow::Result<()> {
        push(
            &self.log,
            format!("set-unit {unit} {}/{}", revision.application, revision.name),
        );
        Ok(())
    }
}

struct Harness {
    log: Log,
    config: UploadBinariesConfig,
    _spool_dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Harness {
        Harness::with_fakes(FakeCharms::default(), FakeTools::default())
    }

    fn with_fakes(mut charms: FakeCharms, mut tools: FakeTools) -> Harness {
        let log: Log = Log::default();
        charms.log = Arc::clone(&log);
        tools.log = Arc::clone(&log);
        let charms = Arc::new(charms);
        let tools = Arc::new(tools);
        let resources = Arc::new(FakeResources {
            log: Arc::clone(&log),
        });
        let spool_dir = tempfile::tempdir().unwrap();
        let config = UploadBinariesConfig {
            charm_downloader: Some(Arc::clone(&charms) as Arc<dyn CharmDownloader>),
            charm_uploader: Some(charms as Arc<dyn CharmUploader>),
            tools_downloader: Some(Arc::clone(&tools) as Arc<dyn ToolsDownloader>),
            tools_uploader: Some(tools as Arc<dyn ToolsUploader>),
            resource_downloader: Some(Arc::clone(&resources) as Arc<dyn ResourceDownloader>),
            resource_uploader: Some(resources as Arc<dyn ResourceUploader>),
            spool_dir: Some(spool_dir.path().to_path_buf()),
            ..Default::default()
        };
        Harness {
            log,
            config,
            _spool_dir: spool_dir,
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn spool_files(&self) -> usize {
        std::fs::read_dir(self._spool_dir.path()).unwrap().count()
    }
}

#[tokio::test]
async fn charms_upload_in_natural_order() {
    let mut h = Harness::new();
    h.config.charms = vec!["cs:a-2".into(), "cs:a-10".into(), "cs:a-3".into()];

    upload_binaries(&h.config).await.unwrap();

    let uploads: Vec<_> = h
        .log()
        .into_iter()
        .filter(|e| e.starts_with("upload-charm"))
        .collect();
    assert_eq!(
        uploads,
        vec![
            "upload-charm cs:a-2 [charm:cs:a-2]",
            "upload-charm cs:a-3 [charm:cs:a-3]",
            "upload-charm cs:a-10 [charm:cs:a-10]",
        ]
    );
}

#[tokio::test]
async fn assigned_reference_mismatch_aborts_before_tools() {
    let mut h = Harness::with_fakes(
        FakeCharms {
            assign: Some("cs:a-99".into()),
            ..Default::default()
        },
        FakeTools::default(),
    );
    h.config.charms = vec!["cs:a-2".into()];
    h.config
        .tools
        .insert("2.1.0-xenial-amd64".into(), "/tools/2.1.0".into());

    let err = upload_binaries(&h.config).await.unwrap_err();
    match err {
        UploadError::CharmReferenceMismatch {
            requested,
            assigned,
        } => {
            assert_eq!(requested, "cs:a-2");
            assert_eq!(assigned, "cs:a-99");
        }
        other => panic!("expected CharmReferenceMismatch, got {other:?}"),
    }
    assert!(
        !h.log().iter().any(|e| e.starts_with("open-tools")),
        "tools category must not run after a charm integrity failure",
    );
}

#[tokio::test]
async fn tools_are_tagged_with_their_exact_version() {
    let mut h = Harness::new();
    h.config
        .tools
        .insert("2.1.0-xenial-amd64".into(), "/tools/2.1.0".into());
    h.config
        .tools
        .insert("2.1.1-xenial-amd64".into(), "/tools/2.1.1".into());

    upload_binaries(&h.config).await.unwrap();

    let uploads: Vec<_> = h
        .log()
        .into_iter()
        .filter(|e| e.starts_with("upload-tools"))
        .collect();
    assert_eq!(
        uploads,
        vec![
            "upload-tools 2.1.0-xenial-amd64 [tools:/tools/2.1.0]",
            "upload-tools 2.1.1-xenial-amd64 [tools:/tools/2.1.1]",
        ]
    );
}

fn resource(application: &str, name: &str, revision: Option<i64>) -> ResourceRevision {
    ResourceRevision {
        application: application.into(),
        name: name.into(),
        revision,
        origin: "store".into(),
        fingerprint: "ab12".into(),
        size: 64,
    }
}

#[tokio::test]
async fn placeholder_resources_skip_content_but_keep_unit_overrides() {
    let mut h = Harness::new();
    let mut unit_revisions = BTreeMap::new();
    unit_revisions.insert("blog/0".to_string(), resource("blog", "theme", Some(1)));
    unit_revisions.insert("blog/1".to_string(), resource("blog", "theme", Some(2)));
    h.config.resources = vec![SerializedModelResource {
        application_revision: resource("blog", "theme", None),
        unit_revisions,
    }];

    upload_binaries(&h.config).await.unwrap();

    assert_eq!(
        h.log(),
        vec![
            "set-placeholder blog/theme",
            "set-unit blog/0 blog/theme",
            "set-unit blog/1 blog/theme",
        ]
    );
}

#[tokio::test]
async fn full_resources_stream_their_content() {
    let mut h = Harness::new();
    h.config.resources = vec![SerializedModelResource {
        application_revision: resource("blog", "theme", Some(3)),
        unit_revisions: BTreeMap::new(),
    }];

    upload_binaries(&h.config).await.unwrap();

    assert_eq!(
        h.log(),
        vec![
            "open-resource blog/theme",
            "upload-resource blog/theme rev=Some(3) [resource:blog/theme]",
        ]
    );
}

#[tokio::test]
async fn categories_run_in_fixed_order() {
    let mut h = Harness::new();
    h.config.charms = vec!["cs:blog-1".into()];
    h.config
        .tools
        .insert("2.1.0-xenial-amd64".into(), "/tools/2.1.0".into());
    h.config.resources = vec![SerializedModelResource {
        application_revision: resource("blog", "theme", Some(3)),
        unit_revisions: BTreeMap::new(),
    }];

    upload_binaries(&h.config).await.unwrap();

    let kinds: Vec<_> = h
        .log()
        .into_iter()
        .map(|e| e.split_whitespace().next().unwrap().to_string())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "open-charm",
            "upload-charm",
            "open-tools",
            "upload-tools",
            "open-resource",
            "upload-resource",
        ]
    );
}

#[tokio::test]
async fn validation_fails_before_any_io() {
    let h = Harness::new();
    let mut config = h.config.clone();
    config.charms = vec!["cs:blog-1".into()];
    config.charm_downloader = None;

    let err = upload_binaries(&config).await.unwrap_err();
    match err {
        UploadError::MissingCollaborator(name) => assert_eq!(name, "charm downloader"),
        other => panic!("expected MissingCollaborator, got {other:?}"),
    }
    assert!(h.log().is_empty(), "no I/O may happen before validation");
}

#[tokio::test]
async fn download_failures_are_annotated_with_the_item() {
    let mut h = Harness::with_fakes(
        FakeCharms {
            fail_open: true,
            ..Default::default()
        },
        FakeTools::default(),
    );
    h.config.charms = vec!["cs:blog-1".into()];

    let err = upload_binaries(&h.config).await.unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("cannot open charm cs:blog-1"), "{message}");
    assert!(message.contains("blobstore unavailable"), "{message}");
}

#[tokio::test]
async fn malformed_charm_references_are_rejected() {
    let mut h = Harness::new();
    h.config.charms = vec!["no-schema".into()];

    let err = upload_binaries(&h.config).await.unwrap_err();
    assert!(err.to_string().contains("bad charm reference"));
    assert!(h.log().is_empty());
}

#[tokio::test]
async fn spool_files_are_removed_on_success_and_failure() {
    // Success path: charms, tools, and resources all spool and clean up.
    let mut h = Harness::new();
    h.config.charms = vec!["cs:blog-1".into()];
    h.config
        .tools
        .insert("2.1.0-xenial-amd64".into(), "/tools/2.1.0".into());
    h.config.resources = vec![SerializedModelResource {
        application_revision: resource("blog", "theme", Some(3)),
        unit_revisions: BTreeMap::new(),
    }];
    upload_binaries(&h.config).await.unwrap();
    assert_eq!(h.spool_files(), 0, "success run left spool files behind");

    // Failure path: the tools upload fails after its content was spooled.
    let mut h = Harness::with_fakes(
        FakeCharms::default(),
        FakeTools {
            fail_upload: true,
            ..Default::default()
        },
    );
    h.config
        .tools
        .insert("2.1.0-xenial-amd64".into(), "/tools/2.1.0".into());
    upload_binaries(&h.config).await.unwrap_err();
    assert_eq!(h.spool_files(), 0, "failed run left spool files behind");
}
