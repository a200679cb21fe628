//! Simulated BSB Controller
//!
//! A software stand-in for the heating controller on the far end of the bus.
//! It answers `get` with `ret` and `set` with `ack` (or `nack`), and can be
//! muted to exercise the gateway's timeout path.
//!
//! # Example
//!
//! ```rust,ignore
//! use bsb_protocol::demo_table;
//! use bsb_sim::{simulated_device, SimOptions};
//! use std::sync::Arc;
//!
//! let (device, sim) = simulated_device(Arc::new(demo_table()), SimOptions::default());
//! // hand `device` to the gateway, keep `sim` to steer the controller
//! sim.set_muted(true).await;
//! ```

pub mod controller;
pub mod task;

pub use controller::{demo_values, VirtualController};
pub use task::{run_virtual_controller, simulated_device, SimCommand, SimHandle, SimOptions};
