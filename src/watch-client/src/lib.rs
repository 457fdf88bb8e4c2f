// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Typed client-side watchers over the controller's long-poll watch protocol.
//!
//! The controller exposes change notification as server-side watcher resources
//! that are polled with blocking `"Next"` calls and released with `"Stop"`.
//! This crate turns that protocol into typed, cancellable local channels: each
//! watcher runs a pair of background tasks that keep exactly one `"Next"` call
//! outstanding and republish decoded results with backpressure until the
//! watcher is killed or the server reports termination.
//!
//! The concrete RPC transport is abstracted behind [`ApiCaller`]; this crate
//! only relies on the caller's error classification to recognize the two
//! terminal watcher codes (`stopped` and `not found`).

pub mod caller;
pub mod facade;
pub mod params;
pub mod status;
pub mod watch;

pub use crate::caller::{ApiCaller, FacadeCaller, RpcError};
pub use crate::status::{MigrationPhase, MigrationStatus};
pub use crate::watch::{
    MachineStorageIdsWatcher, MigrationStatusWatcher, NotifyWatcher, RelationUnitsWatcher,
    RemoteRelationsWatcher, StringsWatcher, WatchError, Watcher, new_entities_watcher,
    new_filesystem_attachments_watcher, new_migration_status_watcher, new_notify_watcher,
    new_relation_units_watcher, new_remote_relations_watcher, new_strings_watcher,
    new_volume_attachments_watcher,
};
