// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport adapters: the QR-paired socket variant and the cloud-api
//! webhook variant, plus the registry that tracks live sessions.

pub mod cloud;
pub mod normalize;
pub mod registry;
pub mod socket;
pub mod wire;

pub use cloud::{CloudSettings, CloudTransport};
pub use registry::{SessionHandle, SessionRegistry};
pub use socket::{qr_terminal, SocketSettings, SocketTransport};
pub use wire::{WireClient, WireClientFactory, WireEvent, WireMessage};
