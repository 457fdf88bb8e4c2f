// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Wire result envelopes.
//!
//! These are the decode targets for watch registrations and for each watcher
//! kind's `"Next"` responses. Values are freshly decoded into owned structs
//! per event, so a change handed to a consumer never aliases data delivered
//! earlier.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of registering a notification-only watch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NotifyWatchResult {
    pub watcher_id: String,
}

/// Result of registering an entity-name watch, and the decode target for its
/// `"Next"` responses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StringsWatchResult {
    #[serde(default)]
    pub watcher_id: String,
    #[serde(default)]
    pub changes: Vec<String>,
}

/// Result of registering an entity-tag watch. Tags are transformed server
/// side; the payload shape is identical to [`StringsWatchResult`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EntitiesWatchResult {
    #[serde(default)]
    pub watcher_id: String,
    #[serde(default)]
    pub changes: Vec<String>,
}

/// Per-unit settings version inside a relation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnitSettings {
    pub version: i64,
}

/// A diff of units entering and leaving the scope of a relation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelationUnitsChange {
    #[serde(default)]
    pub changed: BTreeMap<String, UnitSettings>,
    #[serde(default)]
    pub departed: Vec<String>,
}

/// Result of registering a relation-units watch, and the decode target for
/// its `"Next"` responses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelationUnitsWatchResult {
    #[serde(default)]
    pub watcher_id: String,
    #[serde(default)]
    pub changes: RelationUnitsChange,
}

/// Identifies one machine storage attachment.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MachineStorageId {
    pub machine_tag: String,
    pub attachment_tag: String,
}

/// Result of registering a storage-attachment watch, and the decode target
/// for its `"Next"` responses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MachineStorageIdsWatchResult {
    #[serde(default)]
    pub watcher_id: String,
    #[serde(default)]
    pub changes: Vec<MachineStorageId>,
}

/// Settings of one remote unit participating in a relation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteRelationUnitChange {
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

/// A diff of one relation an application has with a remote application.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteRelationChange {
    pub relation_id: i64,
    #[serde(default)]
    pub life: String,
    #[serde(default)]
    pub changed_units: BTreeMap<String, RemoteRelationUnitChange>,
    #[serde(default)]
    pub departed_units: Vec<String>,
}

/// A diff of the relations an application has with remote applications,
/// including the remote units involved and their settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteRelationsChange {
    #[serde(default)]
    pub changed_relations: Vec<RemoteRelationChange>,
    #[serde(default)]
    pub removed_relations: Vec<i64>,
}

/// Result of registering a remote-relations watch, and the decode target
/// for its `"Next"` responses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteRelationsWatchResult {
    #[serde(default)]
    pub watcher_id: String,
    #[serde(default)]
    pub change: RemoteRelationsChange,
}

/// The decode target for a migration status watcher's `"Next"` responses.
/// The phase is carried as a string on the wire and parsed client side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MigrationStatusResult {
    pub migration_id: String,
    #[serde(default)]
    pub attempt: i32,
    pub phase: String,
    #[serde(default)]
    pub source_api_addrs: Vec<String>,
    #[serde(default)]
    pub source_ca_cert: String,
    #[serde(default)]
    pub target_api_addrs: Vec<String>,
    #[serde(default)]
    pub target_ca_cert: String,
}

/// Result of a `ModelConfig` facade call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelConfigResult {
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

/// Result of a `ControllerConfig` facade call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControllerConfigResult {
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}
