//! # System Interaction Layer
//!
//! Boundaries between the engine and the operating system.
//!
//! - **`signer`**: the `Signer` collaborator used to CMS-sign exported profiles and to read
//!   signed profiles back, with an implementation that drives the `openssl` tool.
//! - **`import_queue`**: reads a batch of profile files on a background thread and hands
//!   them over one at a time, so every import (and its prompt) finishes before the next.

pub mod import_queue;
pub mod signer;
