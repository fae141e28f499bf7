//! Machine reconciliation against KubeVirt
//!
//! [`Reconciler`] implements [`MachineActuator`]: create, update, delete and
//! exists for Machines backed by KubeVirt VMs. Each call builds a
//! [`MachineScope`], talks to the infra cluster through a VM API client and
//! writes the resulting provider status back onto the Machine.

#![deny(missing_docs)]

pub mod patch;
pub mod reconciler;
pub mod render;
pub mod scope;

#[cfg(test)]
mod test_support;

pub use patch::{KubeMachinePatcher, MachinePatcher};
pub use reconciler::{MachineActuator, Outcome, Reconciler};
pub use render::render_virtual_machine;
pub use scope::MachineScope;
