// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error types shared by the Lua bridge
//!
//! Every variant ends up as a catchable Lua error: handlers return
//! `mlua::Result`, and `BridgeError` converts into `mlua::Error::external`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Wrong arity, wrong value type, missing key, duplicate query argument
    #[error("{0}")]
    Argument(String),

    /// Failure reported by the Kubernetes API client, message kept verbatim
    #[error("{0}")]
    Upstream(String),

    /// A handle that the registry never handed out, or one of another class
    #[error("could not find {class} instance for handle {handle}")]
    InstanceNotFound { class: String, handle: usize },

    #[error("failed to define class '{0}'")]
    ClassDefinition(String),

    #[error("converter already used, create a new one for each conversion")]
    ConverterReused,

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

impl BridgeError {
    pub fn argument(msg: impl Into<String>) -> Self {
        BridgeError::Argument(msg.into())
    }
}

impl From<kube::Error> for BridgeError {
    fn from(err: kube::Error) -> Self {
        BridgeError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Conversion(err.to_string())
    }
}

impl From<BridgeError> for mlua::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Lua(e) => e,
            other => mlua::Error::external(other),
        }
    }
}

/// Innermost message of a Lua error, without callback wrappers and tracebacks
pub fn describe(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => describe(cause),
        mlua::Error::WithContext { cause, .. } => describe(cause),
        mlua::Error::ExternalError(e) => match e.downcast_ref::<BridgeError>() {
            Some(BridgeError::Lua(inner)) => describe(inner),
            Some(bridge) => bridge.to_string(),
            None => e.to_string(),
        },
        mlua::Error::RuntimeError(msg) => match msg.split_once("\nstack traceback:") {
            Some((message, _)) => message.to_string(),
            None => msg.clone(),
        },
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
