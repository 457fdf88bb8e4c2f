// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Binary transfer pipeline for model migrations between controllers.
//!
//! During a model migration the target controller must end up with
//! byte-identical copies of every binary artifact the source holds: charm
//! archives, agent tool archives, and resource content. [`upload_binaries`]
//! moves them in a fixed, significant order (charms, then tools, then
//! resources) through four pairs of directional collaborators, spooling each
//! stream through a temporary file because uploaders require seek support
//! while downloaders only guarantee a forward-readable stream.
//!
//! The pipeline is strictly sequential: charm revision assignment on the
//! target replays in upload order, so charms within the category must never
//! be transferred concurrently. The first hard failure aborts the remaining
//! items in that category and all subsequent categories; retry policy
//! belongs to the caller orchestrating the migration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncSeek};
use tracing::debug;

use crate::spool::spool_to_temp_file;

pub mod model;
pub mod natsort;
pub mod spool;

pub use crate::spool::{SPOOL_PREFIX, SpooledBinary};

/// A forward-readable stream of binary content, as produced by downloaders.
pub type BinaryStream = Box<dyn AsyncRead + Send + Unpin>;

/// A seekable stream of binary content, as required by uploaders.
pub trait SeekableStream: AsyncRead + AsyncSeek + Send + Unpin {}
impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> SeekableStream for T {}

/// Downloads charm archives from the source controller.
#[async_trait]
pub trait CharmDownloader: Send + Sync {
    /// Opens the archive of the identified charm for reading.
    async fn open_charm(&self, charm_ref: &str) -> anyhow::Result<BinaryStream>;
}

/// Uploads charm archives to the target controller.
#[async_trait]
pub trait CharmUploader: Send + Sync {
    /// Uploads a charm archive and returns the reference the target assigned
    /// to it.
    async fn upload_charm(
        &self,
        charm_ref: &str,
        content: &mut dyn SeekableStream,
    ) -> anyhow::Result<String>;
}

/// Downloads agent tool archives from the source controller.
#[async_trait]
pub trait ToolsDownloader: Send + Sync {
    /// Opens the archive at the given source locator for reading.
    async fn open_uri(&self, uri: &str, query: &[(String, String)])
    -> anyhow::Result<BinaryStream>;
}

/// Metadata the target reports for an uploaded tools archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UploadedTools {
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub size: u64,
}

/// Uploads agent tool archives to the target controller.
#[async_trait]
pub trait ToolsUploader: Send + Sync {
    /// Uploads a tools archive tagged with exactly the given version string.
    async fn upload_tools(
        &self,
        content: &mut dyn SeekableStream,
        version: &str,
    ) -> anyhow::Result<Vec<UploadedTools>>;
}

/// Downloads resource content from the source controller.
#[async_trait]
pub trait ResourceDownloader: Send + Sync {
    /// Opens the named application resource for reading.
    async fn open_resource(&self, application: &str, name: &str) -> anyhow::Result<BinaryStream>;
}

/// Uploads resource revisions to the target controller.
#[async_trait]
pub trait ResourceUploader: Send + Sync {
    /// Uploads a full resource revision: metadata plus content.
    async fn upload_resource(
        &self,
        revision: &ResourceRevision,
        content: &mut dyn SeekableStream,
    ) -> anyhow::Result<()>;

    /// Records a revision whose content is not yet available anywhere.
    async fn set_placeholder_resource(&self, revision: &ResourceRevision) -> anyhow::Result<()>;

    /// Records a unit-specific revision override. Metadata only.
    async fn set_unit_resource(
        &self,
        unit: &str,
        revision: &ResourceRevision,
    ) -> anyhow::Result<()>;
}

/// One resource revision as captured in the source model's serialized
/// export. A `revision` of `None` is a placeholder: the content was still
/// pending in the source (for example, not yet fetched from the store) and
/// only the metadata migrates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceRevision {
    pub application: String,
    pub name: String,
    pub revision: Option<i64>,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub size: u64,
}

impl ResourceRevision {
    /// Reports whether this revision carries no content.
    pub fn is_placeholder(&self) -> bool {
        self.revision.is_none()
    }
}

/// A resource's cluster-wide state: the application-level revision plus any
/// unit-specific overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SerializedModelResource {
    pub application_revision: ResourceRevision,
    #[serde(default)]
    pub unit_revisions: BTreeMap<String, ResourceRevision>,
}

/// An error from [`upload_binaries`].
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The configuration is missing a collaborator; nothing was transferred.
    #[error("upload configuration incomplete: missing {0}")]
    MissingCollaborator(&'static str),
    /// The target assigned a different reference than was requested. This is
    /// an integrity violation, not a transient fault, and is never retried:
    /// a diverging reference means the target's revision numbering no longer
    /// matches the source's.
    #[error("charm {requested} unexpectedly assigned {assigned}")]
    CharmReferenceMismatch { requested: String, assigned: String },
    /// An I/O or collaborator failure, annotated with the operation and the
    /// item being transferred.
    #[error(transparent)]
    Transfer(#[from] anyhow::Error),
}

/// Everything [`upload_binaries`] needs to operate. All six collaborators
/// must be present; [`UploadBinariesConfig::validate`] is checked before any
/// I/O happens.
#[derive(Clone, Default)]
pub struct UploadBinariesConfig {
    /// Charm references to transfer, unique, in any order.
    pub charms: Vec<String>,
    pub charm_downloader: Option<Arc<dyn CharmDownloader>>,
    pub charm_uploader: Option<Arc<dyn CharmUploader>>,

    /// Agent tool versions to transfer, keyed by version string, each with
    /// its source locator.
    pub tools: BTreeMap<String, String>,
    pub tools_downloader: Option<Arc<dyn ToolsDownloader>>,
    pub tools_uploader: Option<Arc<dyn ToolsUploader>>,

    /// Resource revisions to transfer, in model export order.
    pub resources: Vec<SerializedModelResource>,
    pub resource_downloader: Option<Arc<dyn ResourceDownloader>>,
    pub resource_uploader: Option<Arc<dyn ResourceUploader>>,

    /// Where to create spool files. `None` means the system temporary
    /// directory.
    pub spool_dir: Option<PathBuf>,
}

impl UploadBinariesConfig {
    /// Derives the transfer lists from a serialized model description. The
    /// collaborators still have to be filled in.
    pub fn for_model(model: &model::ModelDescription) -> UploadBinariesConfig {
        UploadBinariesConfig {
            charms: model.charms.clone(),
            tools: model.tools.clone(),
            resources: model.resources.clone(),
            ..Default::default()
        }
    }

    /// Confirms that all six collaborators are present.
    pub fn validate(&self) -> Result<(), UploadError> {
        self.validated().map(|_| ())
    }

    fn validated(&self) -> Result<ValidatedConfig<'_>, UploadError> {
        use UploadError::MissingCollaborator;
        Ok(ValidatedConfig {
            charms: &self.charms,
            charm_downloader: self
                .charm_downloader
                .as_deref()
                .ok_or(MissingCollaborator("charm downloader"))?,
            charm_uploader: self
                .charm_uploader
                .as_deref()
                .ok_or(MissingCollaborator("charm uploader"))?,
            tools: &self.tools,
            tools_downloader: self
                .tools_downloader
                .as_deref()
                .ok_or(MissingCollaborator("tools downloader"))?,
            tools_uploader: self
                .tools_uploader
                .as_deref()
                .ok_or(MissingCollaborator("tools uploader"))?,
            resources: &self.resources,
            resource_downloader: self
                .resource_downloader
                .as_deref()
                .ok_or(MissingCollaborator("resource downloader"))?,
            resource_uploader: self
                .resource_uploader
                .as_deref()
                .ok_or(MissingCollaborator("resource uploader"))?,
            spool_dir: self.spool_dir.as_deref(),
        })
    }
}

struct ValidatedConfig<'a> {
    charms: &'a [String],
    charm_downloader: &'a dyn CharmDownloader,
    charm_uploader: &'a dyn CharmUploader,
    tools: &'a BTreeMap<String, String>,
    tools_downloader: &'a dyn ToolsDownloader,
    tools_uploader: &'a dyn ToolsUploader,
    resources: &'a [SerializedModelResource],
    resource_downloader: &'a dyn ResourceDownloader,
    resource_uploader: &'a dyn ResourceUploader,
    spool_dir: Option<&'a Path>,
}

/// Sends all binaries stored in the source controller to the target.
///
/// Categories run to completion in a fixed order: charms, then agent tools,
/// then resources. A failure in any category aborts the whole operation
/// without attempting later categories.
pub async fn upload_binaries(config: &UploadBinariesConfig) -> Result<(), UploadError> {
    let cfg = config.validated()?;
    upload_charms(&cfg).await?;
    upload_tools(&cfg).await?;
    upload_resources(&cfg).await?;
    Ok(())
}

async fn upload_charms(cfg: &ValidatedConfig<'_>) -> Result<(), UploadError> {
    // Charms must reach the target in ascending natural order so that charm
    // revisions end up the same in the target as they were in the source.
    let mut charms = cfg.charms.to_vec();
    natsort::sort_naturally(&mut charms);

    for charm_ref in &charms {
        check_charm_ref(charm_ref)?;
        debug!(%charm_ref, "sending charm to target");

        let reader = cfg
            .charm_downloader
            .open_charm(charm_ref)
            .await
            .with_context(|| format!("cannot open charm {charm_ref}"))?;
        let mut content = spool_to_temp_file(cfg.spool_dir, reader)
            .await
            .with_context(|| format!("cannot spool charm {charm_ref}"))?;
        let assigned = cfg
            .charm_uploader
            .upload_charm(charm_ref, &mut content)
            .await
            .with_context(|| format!("cannot upload charm {charm_ref}"))?;
        if assigned != *charm_ref {
            // The target must not assign a different reference.
            return Err(UploadError::CharmReferenceMismatch {
                requested: charm_ref.clone(),
                assigned,
            });
        }
    }
    Ok(())
}

fn check_charm_ref(charm_ref: &str) -> Result<(), UploadError> {
    match charm_ref.split_once(':') {
        Some((schema, rest)) if !schema.is_empty() && !rest.is_empty() => Ok(()),
        _ => Err(UploadError::Transfer(anyhow::anyhow!(
            "bad charm reference {charm_ref:?}"
        ))),
    }
}

async fn upload_tools(cfg: &ValidatedConfig<'_>) -> Result<(), UploadError> {
    // Unlike charms, versions carry no ordering dependency; the map order is
    // just deterministic.
    for (version, uri) in cfg.tools {
        debug!(%version, "sending agent tools to target");

        let reader = cfg
            .tools_downloader
            .open_uri(uri, &[])
            .await
            .with_context(|| format!("cannot open tools {version}"))?;
        let mut content = spool_to_temp_file(cfg.spool_dir, reader)
            .await
            .with_context(|| format!("cannot spool tools {version}"))?;
        let _ = cfg
            .tools_uploader
            .upload_tools(&mut content, version)
            .await
            .with_context(|| format!("cannot upload tools {version}"))?;
    }
    Ok(())
}

async fn upload_resources(cfg: &ValidatedConfig<'_>) -> Result<(), UploadError> {
    for resource in cfg.resources {
        let app_rev = &resource.application_revision;
        if app_rev.is_placeholder() {
            // Content is not available anywhere yet; only the metadata
            // migrates.
            cfg.resource_uploader
                .set_placeholder_resource(app_rev)
                .await
                .with_context(|| {
                    format!(
                        "cannot set placeholder resource {}/{}",
                        app_rev.application, app_rev.name
                    )
                })?;
        } else {
            upload_app_resource(cfg, app_rev).await?;
        }
        // Unit overrides are metadata only and apply regardless of whether
        // the application-level step was a placeholder.
        for (unit, revision) in &resource.unit_revisions {
            cfg.resource_uploader
                .set_unit_resource(unit, revision)
                .await
                .with_context(|| format!("cannot set unit resource {unit}/{}", revision.name))?;
        }
    }
    Ok(())
}

async fn upload_app_resource(
    cfg: &ValidatedConfig<'_>,
    revision: &ResourceRevision,
) -> Result<(), UploadError> {
    debug!(
        application = %revision.application,
        resource = %revision.name,
        "sending resource to target",
    );

    let reader = cfg
        .resource_downloader
        .open_resource(&revision.application, &revision.name)
        .await
        .with_context(|| {
            format!(
                "cannot open resource {}/{}",
                revision.application, revision.name
            )
        })?;
    let mut content = spool_to_temp_file(cfg.spool_dir, reader)
        .await
        .with_context(|| {
            format!(
                "cannot spool resource {}/{}",
                revision.application, revision.name
            )
        })?;
    cfg.resource_uploader
        .upload_resource(revision, &mut content)
        .await
        .with_context(|| {
            format!(
                "cannot upload resource {}/{}",
                revision.application, revision.name
            )
        })?;
    Ok(())
}
