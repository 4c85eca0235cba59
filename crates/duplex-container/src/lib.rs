//! # duplex-container
//!
//! Dependency container with an explicit construction graph.
//!
//! Definitions are registered on a [`ContainerBuilder`] as factories,
//! instances, or [`Injectable`] types. Each definition is a singleton.
//! Dependencies are discovered while resolving and recorded as a
//! [`ResolutionPlan`]; with caching enabled the plan is persisted as JSON
//! and reused on later starts to warm the container in dependency order.

#![deny(unsafe_code)]

pub mod builder;
pub mod cache;
pub mod container;
pub mod errors;
pub mod key;
pub mod lazy;
pub mod plan;

pub use builder::ContainerBuilder;
pub use container::{Container, Injectable, Resolver};
pub use errors::{ContainerError, Result};
pub use key::Key;
pub use lazy::Lazy;
pub use plan::{PlanEntry, ResolutionPlan};
