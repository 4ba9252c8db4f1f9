//! Coordinator (spec §4.G): fans a single goal across remote devices,
//! running one Agent Loop per device over an SSH transport.
//!
//! # Key types
//! - [`Coordinator`] — owns the rollout and aggregates per-device results
//! - [`RolloutStrategy`] / [`FailurePolicy`] — how devices are fanned out
//!   and how a per-device failure is handled
//! - [`DeviceTarget`] / [`DeviceResult`] — one device's identity and outcome
//! - [`SshExecutor`] — the pooled SSH transport backing `shell.run` on each
//!   per-device Agent Loop

pub mod coordinator;
pub mod device;
pub mod ssh;

pub use coordinator::{Coordinator, FailurePolicy, OrchestrationResult, OrchestrationStatus, RolloutStrategy};
pub use device::{DeviceResult, DeviceTarget};
pub use ssh::{SshCommandTool, SshExecutor};
