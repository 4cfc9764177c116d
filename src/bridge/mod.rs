// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Plumbing between host types and the embedded Lua engine

pub mod converter;
pub mod error;
pub mod params;
pub mod registry;

pub use converter::{Converter, NumberMode};
pub use error::{BridgeError, Result};
pub use params::{ParamSchema, ParamType, ParamValue, Params};
pub use registry::{Arity, ClassId, Instance, MethodDescriptor, Receiver, Registry};
