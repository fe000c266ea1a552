//! Triggering adapters.
//!
//! An adapter validates an incoming request, creates a task with a
//! completion callback suited to its backend, answers `202 Accepted` and
//! fires the backend call. Each submodule serves one Redfish action.

pub mod bmc_group;
