// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation routing: inbound message handling, outbound dispatch,
//! and the ticket lifecycle.

pub mod locks;
pub mod router;

pub use router::{Router, SendOutcome, SendRequest};
