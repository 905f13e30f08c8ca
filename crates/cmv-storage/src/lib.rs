// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk persistence for the volume lifecycle engine: the filesystem
//! layout (L1), the metadata sidecar store (L2), and the payload
//! writer/reader (L3, L4).

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod layout;
mod metadata;
mod payload;

pub use layout::FilesystemLayout;
pub use metadata::{list_payload_ids, MetadataError, MetadataStore};
pub use payload::{delete_payload, read_payload, update_payload, PayloadError};



#[cfg(test)]
#[path = "payload_tests.rs"]
mod payload_tests;
