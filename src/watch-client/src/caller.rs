// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The abstract RPC caller boundary.
//!
//! Everything in this crate reaches the controller through [`ApiCaller`], a
//! thin seam over whatever transport the embedding process uses. The only
//! structure this crate depends on is the error classification: the two
//! terminal watcher codes must be distinguishable from all other failures.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Code reported when a watcher was explicitly stopped.
pub const CODE_STOPPED: &str = "stopped";
/// Code reported when the server no longer knows the watcher.
pub const CODE_NOT_FOUND: &str = "not found";

/// An error returned by an [`ApiCaller`], optionally carrying a
/// machine-readable code assigned by the server.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RpcError {
    message: String,
    code: Option<String>,
}

impl RpcError {
    /// Constructs an error with no code.
    pub fn new(message: impl Into<String>) -> RpcError {
        RpcError {
            message: message.into(),
            code: None,
        }
    }

    /// Constructs an error carrying a server-assigned code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> RpcError {
        RpcError {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Returns the server-assigned code, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Reports whether the server stopped the watcher.
    pub fn is_code_stopped(&self) -> bool {
        self.code() == Some(CODE_STOPPED)
    }

    /// Reports whether the server no longer knows the watcher.
    pub fn is_code_not_found(&self) -> bool {
        self.code() == Some(CODE_NOT_FOUND)
    }

    /// Reports whether this is one of the recognized terminal watcher codes.
    ///
    /// A `Stop` racing an in-flight `Next` surfaces as `stopped`; a `Next`
    /// issued just after the watcher was removed surfaces as `not found`.
    pub fn is_terminal(&self) -> bool {
        self.is_code_stopped() || self.is_code_not_found()
    }
}

/// The abstract RPC caller.
///
/// For watcher facades, `method` is always one of the two literal strings
/// `"Next"` or `"Stop"`: `"Next"` blocks server-side until a change exists or
/// the watcher is stopped, `"Stop"` takes no arguments and returns nothing.
#[async_trait]
pub trait ApiCaller: fmt::Debug + Send + Sync {
    /// Returns the best facade version shared with the server.
    fn best_facade_version(&self, facade: &str) -> u32;

    /// Invokes `method` on the identified facade object.
    ///
    /// `id` names a server-side resource (a watcher id, for watcher facades)
    /// and is empty for facade-level calls.
    async fn api_call(
        &self,
        facade: &str,
        version: u32,
        id: &str,
        method: &str,
        args: Option<Value>,
    ) -> Result<Value, RpcError>;
}

/// An [`ApiCaller`] paired with a facade name and its negotiated version.
#[derive(Clone, Debug)]
pub struct FacadeCaller {
    caller: Arc<dyn ApiCaller>,
    facade: String,
    version: u32,
}

impl FacadeCaller {
    /// Binds `caller` to the named facade at its best version.
    pub fn new(caller: Arc<dyn ApiCaller>, facade: &str) -> FacadeCaller {
        let version = caller.best_facade_version(facade);
        FacadeCaller {
            caller,
            facade: facade.into(),
            version,
        }
    }

    /// The facade name this caller is bound to.
    pub fn facade(&self) -> &str {
        &self.facade
    }

    /// The negotiated facade version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the underlying caller, for handing off to watchers.
    pub fn raw_caller(&self) -> Arc<dyn ApiCaller> {
        Arc::clone(&self.caller)
    }

    /// Invokes a facade-level method.
    pub async fn call(&self, method: &str, args: Option<Value>) -> Result<Value, RpcError> {
        self.caller
            .api_call(&self.facade, self.version, "", method, args)
            .await
    }
}
