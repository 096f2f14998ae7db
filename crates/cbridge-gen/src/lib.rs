//! Safe Rust binding generation for C libraries.
//!
//! Turns a parsed header into a Rust module with two surfaces: safe wrappers
//! for every symbol that can be mapped without losing an invariant, and an
//! explicit unsafe escape hatch listing everything else with a reason.
//!
//! ## Modules
//!
//! - [`pattern`]: name patterns shared by every rule
//! - [`select`]: symbol selection
//! - [`classify`]: enumeration representation decisions
//! - [`ownership`]: handle ownership roles and the handle table
//! - [`naming`]: name normalization and collision detection
//! - [`mapper`]: C signature to safe signature mapping
//! - [`emit`]: module text generation
//! - [`config`]: `*.bind.toml` configuration
//! - [`policy`]: project policy checks
//! - [`report`]: generation report
//! - [`digest`]: input digest
//! - [`builder`]: the end-to-end pipeline

pub mod builder;
pub mod classify;
pub mod config;
pub mod digest;
pub mod emit;
pub mod error;
pub mod mapper;
pub mod naming;
pub mod ownership;
pub mod pattern;
pub mod policy;
pub mod report;
pub mod select;

pub use builder::{Builder, Generation};
pub use classify::{classify, Classification, EnumDirective, EnumerationMapping, Representation};
pub use config::BindingConfig;
pub use emit::{emit, EmitOptions, GeneratedModule, ModuleEntry, Surface};
pub use error::{GenError, Result};
pub use mapper::{StatusRule, Unmappable, UnmappableReason};
pub use naming::Naming;
pub use ownership::{HandleSpec, HandleTable, OwnershipDecision, OwnershipRole, OwnershipRules};
pub use pattern::Pattern;
pub use policy::Policy;
pub use report::GenerationReport;
pub use select::{select, Selection, SelectionRule};

pub use cbridge_catalog::{Catalog, HeaderOptions, SymbolKind};
