//! Fact gathering from a switch under test.
//!
//! This crate runs show commands on a device through a [`CommandRunner`],
//! decodes their fixed-width output with [`dut_facts_core`], and turns the
//! records into typed facts: platform string, feature states, firmware
//! component versions and What-Just-Happened configuration. It also carries
//! the firmware update, SFP and tech-support checks built on those facts.
//!
//! # Main entry points
//!
//! - [`gather_facts`]: collect every fact from one device into a
//!   [`GatherReport`]; a failing fact is recorded, never fatal.
//! - [`gather_inventory`]: the same for every device in an
//!   [`Inventory`], in parallel.
//! - [`firmware`], [`wjh`], [`sfp`], [`techsupport`]: individual checks.
//!
//! # Example
//!
//! ```
//! use dut_facts_gather::runner::ScriptedRunner;
//! use dut_facts_gather::features::{gather_features, SHOW_FEATURES};
//!
//! let runner = ScriptedRunner::new("dut-1").respond(
//!     SHOW_FEATURES,
//!     "Feature  Status\n-------  -------\nlldp     enabled\n",
//! );
//! let features = gather_features(&runner).unwrap();
//! assert!(features.is_enabled("lldp"));
//! ```

pub mod collect;
pub mod config;
pub mod error;
pub mod features;
pub mod firmware;
pub mod output;
pub mod platform;
pub mod report;
pub mod runner;
pub mod sfp;
pub mod techsupport;
pub mod wjh;

pub use collect::{gather_facts, gather_inventory, gather_inventory_with};
pub use config::{DutConfig, Inventory};
pub use error::{GatherError, Result};
pub use report::{FactFailure, FailureCode, GatherReport};
pub use runner::CommandRunner;
