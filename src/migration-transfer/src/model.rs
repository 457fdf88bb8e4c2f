// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Serialized model descriptions.
//!
//! A migration starts by exporting an abstract representation of the model
//! from the source controller's store and importing it into the target. The
//! description also names every binary artifact the model depends on, which
//! is where the transfer lists for
//! [`UploadBinariesConfig`](crate::UploadBinariesConfig) come from.

use std::collections::BTreeMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SerializedModelResource;

/// An abstract representation of one model, sufficient to recreate it on
/// another controller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelDescription {
    pub name: String,
    pub uuid: String,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    /// References of every charm deployed in the model.
    #[serde(default)]
    pub charms: Vec<String>,
    /// Agent tool versions in use, each with its source locator.
    #[serde(default)]
    pub tools: BTreeMap<String, String>,
    /// Resource state for every application in the model.
    #[serde(default)]
    pub resources: Vec<SerializedModelResource>,
}

/// Generates an abstract representation of a model from a backing store.
pub trait StateExporter {
    /// Exports the active model.
    fn export(&self) -> anyhow::Result<ModelDescription>;
}

/// Exports the active model and returns its serialized form. Symmetric with
/// [`import_model`].
pub fn export_model(exporter: &dyn StateExporter) -> anyhow::Result<Vec<u8>> {
    let model = exporter.export().context("cannot export model")?;
    serde_json::to_vec_pretty(&model).context("cannot serialize model")
}

/// Deserializes a model description produced by [`export_model`].
pub fn import_model(bytes: &[u8]) -> anyhow::Result<ModelDescription> {
    serde_json::from_slice(bytes).context("cannot deserialize model")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceRevision;

    struct FixedExporter(ModelDescription);

    impl StateExporter for FixedExporter {
        fn export(&self) -> anyhow::Result<ModelDescription> {
            Ok(self.0.clone())
        }
    }

    fn sample_model() -> ModelDescription {
        ModelDescription {
            name: "prod".into(),
            uuid: "3c19d272-9f71-4d70-a3cf-fa2f7e383980".into(),
            config: [("automatically-retry-hooks".to_string(), Value::Bool(true))]
                .into_iter()
                .collect(),
            charms: vec!["cs:wordpress-5".into(), "cs:mysql-3".into()],
            tools: [(
                "2.1.0-xenial-amd64".to_string(),
                "/tools/2.1.0-xenial-amd64".to_string(),
            )]
            .into_iter()
            .collect(),
            resources: vec![SerializedModelResource {
                application_revision: ResourceRevision {
                    application: "wordpress".into(),
                    name: "theme".into(),
                    revision: Some(3),
                    origin: "store".into(),
                    fingerprint: "ab12".into(),
                    size: 512,
                },
                unit_revisions: BTreeMap::new(),
            }],
        }
    }

    #[test]
    fn export_import_round_trips() {
        let model = sample_model();
        let bytes = export_model(&FixedExporter(model.clone())).unwrap();
        let back = import_model(&bytes).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn import_rejects_garbage() {
        let err = import_model(b"not json").unwrap_err();
        assert!(err.to_string().contains("cannot deserialize model"));
    }

    #[test]
    fn config_for_model_carries_the_transfer_lists() {
        let model = sample_model();
        let config = crate::UploadBinariesConfig::for_model(&model);
        assert_eq!(config.charms, model.charms);
        assert_eq!(config.tools, model.tools);
        assert_eq!(config.resources, model.resources);
        // Collaborators still have to be provided.
        assert!(config.validate().is_err());
    }
}
