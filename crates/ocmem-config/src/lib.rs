// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loading and model for the opencode-mem service.

pub mod loader;
pub mod model;

pub use loader::{load_config, load_config_from_str};
pub use model::OcmemConfig;
