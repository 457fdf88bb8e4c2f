// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Facade front-ends shared by several agent workers.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::caller::{FacadeCaller, RpcError};
use crate::params::{ControllerConfigResult, ModelConfigResult, NotifyWatchResult};
use crate::watch::{NotifyWatcher, new_notify_watcher};

/// An error from a facade front-end.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FacadeError {
    #[error(transparent)]
    Call(#[from] RpcError),
    #[error("bad {method} response: {reason}")]
    Decode { method: String, reason: String },
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T, FacadeError> {
    serde_json::from_value(value).map_err(|err| FacadeError::Decode {
        method: method.into(),
        reason: err.to_string(),
    })
}

/// Client-side access to the server's common ModelWatcher methods, on
/// whichever facade the caller is bound to.
#[derive(Clone, Debug)]
pub struct ModelWatcher {
    facade: FacadeCaller,
}

impl ModelWatcher {
    /// Creates a `ModelWatcher` on the given facade.
    pub fn new(facade: FacadeCaller) -> ModelWatcher {
        ModelWatcher { facade }
    }

    /// Returns a watcher that fires when the model configuration changes.
    pub async fn watch_for_model_config_changes(&self) -> Result<NotifyWatcher, FacadeError> {
        let method = "WatchForModelConfigChanges";
        let value = self.facade.call(method, None).await?;
        let result: NotifyWatchResult = decode(method, value)?;
        Ok(new_notify_watcher(self.facade.raw_caller(), result))
    }

    /// Returns the current model configuration.
    pub async fn model_config(&self) -> Result<BTreeMap<String, Value>, FacadeError> {
        let method = "ModelConfig";
        let value = self.facade.call(method, None).await?;
        let result: ModelConfigResult = decode(method, value)?;
        Ok(result.config)
    }
}

/// Client-side access to the server's common ControllerConfig method.
#[derive(Clone, Debug)]
pub struct ControllerConfigClient {
    facade: FacadeCaller,
}

impl ControllerConfigClient {
    /// Creates a `ControllerConfigClient` on the given facade.
    pub fn new(facade: FacadeCaller) -> ControllerConfigClient {
        ControllerConfigClient { facade }
    }

    /// Returns the current controller configuration.
    pub async fn controller_config(&self) -> Result<BTreeMap<String, Value>, FacadeError> {
        let method = "ControllerConfig";
        let value = self.facade.call(method, None).await?;
        let result: ControllerConfigResult = decode(method, value)?;
        Ok(result.config)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::caller::ApiCaller;

    #[derive(Debug, Default)]
    struct ConfigCaller {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ApiCaller for ConfigCaller {
        fn best_facade_version(&self, _facade: &str) -> u32 {
            3
        }

        async fn api_call(
            &self,
            facade: &str,
            version: u32,
            id: &str,
            method: &str,
            _args: Option<Value>,
        ) -> Result<Value, RpcError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{facade}({version})/{id}.{method}"));
            match method {
                "ModelConfig" => Ok(json!({"config": {"name": "prod", "automatic": true}})),
                "ControllerConfig" => Ok(json!({"config": {"api-port": 17070}})),
                "WatchForModelConfigChanges" => Ok(json!({"watcher-id": "w-9"})),
                other => Err(RpcError::new(format!("unknown method {other}"))),
            }
        }
    }

    #[tokio::test]
    async fn model_config_decodes_and_uses_best_version() {
        let caller = Arc::new(ConfigCaller::default());
        let watcher = ModelWatcher::new(FacadeCaller::new(Arc::clone(&caller) as Arc<dyn ApiCaller>, "Agent"));

        let config = watcher.model_config().await.unwrap();
        assert_eq!(config["name"], json!("prod"));
        assert_eq!(
            caller.calls.lock().unwrap().as_slice(),
            ["Agent(3)/.ModelConfig"]
        );
    }

    #[tokio::test]
    async fn controller_config_decodes() {
        let caller = Arc::new(ConfigCaller::default());
        let client =
            ControllerConfigClient::new(FacadeCaller::new(Arc::clone(&caller) as Arc<dyn ApiCaller>, "Agent"));

        let config = client.controller_config().await.unwrap();
        assert_eq!(config["api-port"], json!(17070));
    }

    #[tokio::test]
    async fn watch_for_model_config_changes_returns_a_running_watcher() {
        let caller = Arc::new(ConfigCaller::default());
        let watcher = ModelWatcher::new(FacadeCaller::new(Arc::clone(&caller) as Arc<dyn ApiCaller>, "Agent"));

        let mut w = watcher.watch_for_model_config_changes().await.unwrap();
        assert_eq!(w.id(), "w-9");
        // The fake has no Next support, so the loop dies with an error; the
        // registration itself is what is under test here.
        w.kill();
        let _ = w.wait().await;
    }
}
