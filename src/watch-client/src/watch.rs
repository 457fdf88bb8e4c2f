// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The watcher driver and the concrete watcher kinds.
//!
//! Each watcher spawns a small task constellation mirroring the protocol:
//!
//!  * The issuer task keeps exactly one blocking `"Next"` call outstanding,
//!    decodes each result, and hands it off on a bounded channel, so only a
//!    small fixed number of decoded changes is ever buffered ahead of the
//!    consumer.
//!  * The relay task delivers the current change on the public channel,
//!    blocking until the consumer takes it or the watcher starts dying.
//!  * The stopper task waits for the watcher to start dying and then issues
//!    a single `"Stop"` call to release the server-side resource.
//!
//! Shutdown is two-phase: [`Watcher::kill`] marks the watcher dying, which
//! triggers the `"Stop"` call while an issuer's `"Next"` may still be in
//! flight. The server fails that `"Next"` with one of the terminal codes,
//! which the issuer converts into clean termination. The same codes can
//! arrive without a local kill if the server tore the watcher down on its
//! own; the original client does not distinguish the two cases, and neither
//! does this one.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

use crate::caller::{ApiCaller, RpcError};
use crate::params::{
    EntitiesWatchResult, MachineStorageId, MachineStorageIdsWatchResult, MigrationStatusResult,
    NotifyWatchResult, RelationUnitsChange, RelationUnitsWatchResult, RemoteRelationsChange,
    RemoteRelationsWatchResult, StringsWatchResult,
};
use crate::status::MigrationStatus;

/// A terminal watcher error, as returned by [`Watcher::wait`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// A `"Next"` call failed with something other than a terminal code.
    #[error("watcher {id}: call to Next failed: {source}")]
    Next { id: String, source: RpcError },
    /// A `"Next"` result could not be decoded.
    #[error("watcher {id}: bad Next response: {reason}")]
    Decode { id: String, reason: String },
    /// A migration status carried a phase this client does not recognize.
    #[error("watcher {id}: invalid migration phase {phase:?}")]
    InvalidPhase { id: String, phase: String },
    /// A background task failed outright.
    #[error("watcher {id}: background task failed: {reason}")]
    Task { id: String, reason: String },
}

/// A running watcher delivering changes of type `T`.
///
/// Values arrive strictly in server order with no drops. The handoff and
/// public channels are bounded at one, so a slow consumer backpressures the
/// issuer after a small fixed number of undelivered changes: one held by the
/// relay plus at most one buffered in each channel. Constructors must be
/// called from within a tokio runtime.
pub struct Watcher<T> {
    id: String,
    changes: mpsc::Receiver<T>,
    dying: watch::Sender<bool>,
    done: Option<oneshot::Receiver<Result<(), WatchError>>>,
    terminal: Option<Result<(), WatchError>>,
}

/// A watcher that reports that something changed, without content.
pub type NotifyWatcher = Watcher<()>;
/// A watcher that reports the names of changed entities.
pub type StringsWatcher = Watcher<Vec<String>>;
/// A watcher that reports units entering and leaving a relation's scope.
pub type RelationUnitsWatcher = Watcher<RelationUnitsChange>;
/// A watcher that reports changes to the relations an application has with
/// remote applications.
pub type RemoteRelationsWatcher = Watcher<RemoteRelationsChange>;
/// A watcher that reports changed machine storage attachments.
pub type MachineStorageIdsWatcher = Watcher<Vec<MachineStorageId>>;
/// A watcher that reports the status of a model migration.
pub type MigrationStatusWatcher = Watcher<MigrationStatus>;

impl<T: Send + 'static> Watcher<T> {
    fn spawn<D>(
        caller: Arc<dyn ApiCaller>,
        facade: &str,
        id: String,
        initial: Option<T>,
        decode: D,
    ) -> Watcher<T>
    where
        D: Fn(Value) -> Result<T, WatchError> + Send + Sync + 'static,
    {
        let call = Arc::new(WatcherCall::new(caller, facade, id.clone()));
        let (dying_tx, _) = watch::channel(false);
        let (out_tx, out_rx) = mpsc::channel(1);
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();

        let issuer = tokio::spawn(run_issuer(
            Arc::clone(&call),
            dying_tx.subscribe(),
            handoff_tx,
            decode,
        ));
        let relay = tokio::spawn(run_relay(initial, out_tx, handoff_rx, dying_tx.subscribe()));
        let stopper = tokio::spawn(run_stopper(Arc::clone(&call), dying_tx.subscribe()));
        tokio::spawn(supervise(
            call,
            dying_tx.clone(),
            issuer,
            relay,
            stopper,
            done_tx,
        ));

        Watcher {
            id,
            changes: out_rx,
            dying: dying_tx,
            done: Some(done_rx),
            terminal: None,
        }
    }
}

impl<T> Watcher<T> {
    /// The server-side watcher id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receives the next change.
    ///
    /// The first value reflects the watcher's initial state, not a diff.
    /// Returns `None` once the watcher has terminated and all buffered
    /// changes were delivered; [`Watcher::wait`] then reports why.
    pub async fn next(&mut self) -> Option<T> {
        self.changes.recv().await
    }

    /// The public change channel, for use in `select!` loops.
    pub fn changes(&mut self) -> &mut mpsc::Receiver<T> {
        &mut self.changes
    }

    /// Asks the watcher to stop. Idempotent and non-blocking.
    pub fn kill(&self) {
        let _ = self.dying.send(true);
    }

    /// Blocks until the background tasks have fully terminated and returns
    /// the terminal error, if any. The result is latched: calling `wait`
    /// again returns immediately with the same answer.
    pub async fn wait(&mut self) -> Result<(), WatchError> {
        if let Some(result) = &self.terminal {
            return result.clone();
        }
        let result = match self.done.take() {
            Some(done) => done.await.unwrap_or_else(|_| {
                Err(WatchError::Task {
                    id: self.id.clone(),
                    reason: "watcher terminated without reporting a result".into(),
                })
            }),
            None => Err(WatchError::Task {
                id: self.id.clone(),
                reason: "watcher result already consumed".into(),
            }),
        };
        self.terminal = Some(result.clone());
        result
    }
}

impl<T> Drop for Watcher<T> {
    fn drop(&mut self) {
        // Release the server-side resource even if the owner never called
        // kill. The stopper task outlives this handle.
        let _ = self.dying.send(true);
    }
}

/// Binds a caller to one watcher resource, so the issuer and stopper share
/// the same facade, version, and id.
#[derive(Debug)]
struct WatcherCall {
    caller: Arc<dyn ApiCaller>,
    facade: String,
    version: u32,
    id: String,
}

impl WatcherCall {
    fn new(caller: Arc<dyn ApiCaller>, facade: &str, id: String) -> WatcherCall {
        let version = caller.best_facade_version(facade);
        WatcherCall {
            caller,
            facade: facade.into(),
            version,
            id,
        }
    }

    async fn call(&self, method: &str) -> Result<Value, RpcError> {
        self.caller
            .api_call(&self.facade, self.version, &self.id, method, None)
            .await
    }
}

async fn run_issuer<T, D>(
    call: Arc<WatcherCall>,
    mut dying: watch::Receiver<bool>,
    handoff: mpsc::Sender<T>,
    decode: D,
) -> Result<(), WatchError>
where
    T: Send + 'static,
    D: Fn(Value) -> Result<T, WatchError>,
{
    loop {
        // Next blocks server-side until a change exists or the watcher is
        // stopped, so this await has unbounded latency.
        let value = match call.call("Next").await {
            Ok(value) => value,
            Err(error) if error.is_terminal() => {
                // The watcher was stopped at this end, or the server tore it
                // down independently. We might see the same codes in either
                // case and cannot tell them apart, so both terminate cleanly.
                debug!(watcher_id = %call.id, "watcher terminated: {error}");
                return Ok(());
            }
            Err(source) => {
                return Err(WatchError::Next {
                    id: call.id.clone(),
                    source,
                });
            }
        };
        let change = decode(value)?;
        tokio::select! {
            _ = dying.wait_for(|flag| *flag) => return Ok(()),
            res = handoff.send(change) => {
                if res.is_err() {
                    // The relay is gone; it holds the terminal result.
                    return Ok(());
                }
            }
        }
    }
}

async fn run_relay<T>(
    initial: Option<T>,
    out: mpsc::Sender<T>,
    mut handoff: mpsc::Receiver<T>,
    mut dying: watch::Receiver<bool>,
) -> Result<(), WatchError> {
    let mut current = initial;
    loop {
        if let Some(change) = current.take() {
            tokio::select! {
                _ = dying.wait_for(|flag| *flag) => return Ok(()),
                res = out.send(change) => {
                    if res.is_err() {
                        // The consumer dropped the channel; treat it as a
                        // stop request.
                        return Ok(());
                    }
                }
            }
        }
        tokio::select! {
            _ = dying.wait_for(|flag| *flag) => return Ok(()),
            next = handoff.recv() => match next {
                Some(change) => current = Some(change),
                // The issuer finished; its result is the terminal one.
                None => return Ok(()),
            }
        }
    }
}

async fn run_stopper(call: Arc<WatcherCall>, mut dying: watch::Receiver<bool>) {
    if dying.wait_for(|flag| *flag).await.is_err() {
        return;
    }
    // Issued exactly once, whether the watcher is dying because of a local
    // kill or because the issuer observed an error. A Stop racing an
    // in-flight Next makes the server fail that Next with a terminal code.
    debug!(watcher_id = %call.id, "stopping watcher");
    if let Err(error) = call.call("Stop").await {
        error!(watcher_id = %call.id, "error trying to stop watcher: {error}");
    }
}

async fn supervise(
    call: Arc<WatcherCall>,
    dying: watch::Sender<bool>,
    issuer: JoinHandle<Result<(), WatchError>>,
    relay: JoinHandle<Result<(), WatchError>>,
    stopper: JoinHandle<()>,
    done: oneshot::Sender<Result<(), WatchError>>,
) {
    let mut issuer = issuer;
    let mut relay = relay;
    // Whichever task finishes first caused termination; marking the watcher
    // dying then releases the other (the stopper's Stop unblocks an issuer
    // stuck in Next).
    let (first, second) = tokio::select! {
        res = &mut issuer => {
            let first = flatten(&call.id, res);
            let _ = dying.send(true);
            (first, flatten(&call.id, (&mut relay).await))
        }
        res = &mut relay => {
            let first = flatten(&call.id, res);
            let _ = dying.send(true);
            (first, flatten(&call.id, (&mut issuer).await))
        }
    };
    let _ = stopper.await;
    let result = if first.is_err() { first } else { second };
    let _ = done.send(result);
}

fn flatten(id: &str, res: Result<Result<(), WatchError>, JoinError>) -> Result<(), WatchError> {
    match res {
        Ok(inner) => inner,
        Err(join) => Err(WatchError::Task {
            id: id.into(),
            reason: join.to_string(),
        }),
    }
}

fn decode_err(id: &str, err: serde_json::Error) -> WatchError {
    WatchError::Decode {
        id: id.into(),
        reason: err.to_string(),
    }
}

/// Turns a notify watch registration into a running watcher. Emits one `()`
/// for the initial state and one per subsequent change.
pub fn new_notify_watcher(caller: Arc<dyn ApiCaller>, result: NotifyWatchResult) -> NotifyWatcher {
    Watcher::spawn(
        caller,
        "NotifyWatcher",
        result.watcher_id,
        Some(()),
        // No payload for this watcher kind.
        |_| Ok(()),
    )
}

/// Turns a strings watch registration into a running watcher. The first
/// value is the initial change set carried by the registration result.
pub fn new_strings_watcher(
    caller: Arc<dyn ApiCaller>,
    result: StringsWatchResult,
) -> StringsWatcher {
    let id = result.watcher_id;
    let decode_id = id.clone();
    Watcher::spawn(
        caller,
        "StringsWatcher",
        id,
        Some(result.changes),
        move |value| {
            let result: StringsWatchResult =
                serde_json::from_value(value).map_err(|err| decode_err(&decode_id, err))?;
            Ok(result.changes)
        },
    )
}

/// Turns an entities watch registration into a running watcher. Tags are
/// transformed server side, so the payload is delivered untouched.
pub fn new_entities_watcher(
    caller: Arc<dyn ApiCaller>,
    result: EntitiesWatchResult,
) -> StringsWatcher {
    let id = result.watcher_id;
    let decode_id = id.clone();
    Watcher::spawn(
        caller,
        "EntityWatcher",
        id,
        Some(result.changes),
        move |value| {
            let result: EntitiesWatchResult =
                serde_json::from_value(value).map_err(|err| decode_err(&decode_id, err))?;
            Ok(result.changes)
        },
    )
}

/// Turns a relation-units watch registration into a running watcher. The
/// first value holds the initial scope of the relation; every delivered
/// change owns its maps outright, so consumers never observe mutation of
/// data delivered earlier.
pub fn new_relation_units_watcher(
    caller: Arc<dyn ApiCaller>,
    result: RelationUnitsWatchResult,
) -> RelationUnitsWatcher {
    let id = result.watcher_id;
    let decode_id = id.clone();
    Watcher::spawn(
        caller,
        "RelationUnitsWatcher",
        id,
        Some(result.changes),
        move |value| {
            let result: RelationUnitsWatchResult =
                serde_json::from_value(value).map_err(|err| decode_err(&decode_id, err))?;
            Ok(result.changes)
        },
    )
}

/// Turns a remote-relations watch registration into a running watcher. The
/// first value holds the initial state of the application's relations in its
/// changed-relations field; every delivered change owns its relation list
/// and nested unit settings maps outright.
pub fn new_remote_relations_watcher(
    caller: Arc<dyn ApiCaller>,
    result: RemoteRelationsWatchResult,
) -> RemoteRelationsWatcher {
    let id = result.watcher_id;
    let decode_id = id.clone();
    Watcher::spawn(
        caller,
        "RemoteRelationsWatcher",
        id,
        Some(result.change),
        move |value| {
            let result: RemoteRelationsWatchResult =
                serde_json::from_value(value).map_err(|err| decode_err(&decode_id, err))?;
            Ok(result.change)
        },
    )
}

/// Returns a watcher reporting volume attachment changes.
pub fn new_volume_attachments_watcher(
    caller: Arc<dyn ApiCaller>,
    result: MachineStorageIdsWatchResult,
) -> MachineStorageIdsWatcher {
    new_machine_storage_ids_watcher("VolumeAttachmentsWatcher", caller, result)
}

/// Returns a watcher reporting filesystem attachment changes.
pub fn new_filesystem_attachments_watcher(
    caller: Arc<dyn ApiCaller>,
    result: MachineStorageIdsWatchResult,
) -> MachineStorageIdsWatcher {
    new_machine_storage_ids_watcher("FilesystemAttachmentsWatcher", caller, result)
}

fn new_machine_storage_ids_watcher(
    facade: &str,
    caller: Arc<dyn ApiCaller>,
    result: MachineStorageIdsWatchResult,
) -> MachineStorageIdsWatcher {
    let id = result.watcher_id;
    let decode_id = id.clone();
    Watcher::spawn(caller, facade, id, Some(result.changes), move |value| {
        let result: MachineStorageIdsWatchResult =
            serde_json::from_value(value).map_err(|err| decode_err(&decode_id, err))?;
        Ok(result.changes)
    })
}

/// Turns the watcher id returned by a migration `Watch` call into a running
/// migration status watcher. This kind has no initial event: the first
/// `"Next"` result is the first status delivered.
pub fn new_migration_status_watcher(
    caller: Arc<dyn ApiCaller>,
    watcher_id: impl Into<String>,
) -> MigrationStatusWatcher {
    let id = watcher_id.into();
    let decode_id = id.clone();
    Watcher::spawn(caller, "MigrationStatusWatcher", id, None, move |value| {
        let raw: MigrationStatusResult =
            serde_json::from_value(value).map_err(|err| decode_err(&decode_id, err))?;
        let phase = raw.phase.parse().map_err(|_| WatchError::InvalidPhase {
            id: decode_id.clone(),
            phase: raw.phase.clone(),
        })?;
        Ok(MigrationStatus {
            migration_id: raw.migration_id,
            attempt: raw.attempt,
            phase,
            source_api_addrs: raw.source_api_addrs,
            source_ca_cert: raw.source_ca_cert,
            target_api_addrs: raw.target_api_addrs,
            target_ca_cert: raw.target_ca_cert,
        })
    })
}
