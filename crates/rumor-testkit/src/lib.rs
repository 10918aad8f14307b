//! # Rumor Testkit
//!
//! Testing utilities for Rumor.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Topologies**: Line, ring, star, tree, mesh and grid builders
//! - **Generators**: Proptest strategies for values, batches, connected topologies
//! - **Simulation**: A seeded, lossy, lockstep round simulator with no runtime
//! - **Fixtures**: A running cluster on the in-memory network
//!
//! ## Simulation
//!
//! Deterministic convergence checks without timers:
//!
//! ```rust
//! use rumor_core::{NodeId, Value};
//! use rumor_testkit::{sim::Simulation, topologies};
//!
//! let mut sim = Simulation::new(&topologies::ring(5), 42).unwrap().with_drop_rate(0.2);
//! sim.submit(&NodeId::from("n1"), Value(7));
//! sim.run_until_quiescent(1_000).unwrap();
//! assert!(sim.convergence().is_converged());
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use rumor_testkit::generators::Workload;
//!
//! proptest! {
//!     #[test]
//!     fn every_workload_converges(workload: Workload) {
//!         // ...
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Real nodes, real workers, in-memory network:
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rumor_core::{NodeId, Value};
//! use rumor_testkit::fixtures::{fast_config, TestCluster};
//! use rumor_testkit::topologies;
//!
//! async fn example() {
//!     let cluster = TestCluster::start(&topologies::line(3), fast_config()).await.unwrap();
//!     cluster.broadcast(&NodeId::from("n1"), Value(1)).await.unwrap();
//!     let expected = [Value(1)].into_iter().collect();
//!     assert!(cluster.wait_converged(&expected, Duration::from_secs(5)).await);
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod sim;
pub mod topologies;

pub use fixtures::{fast_config, TestCluster};
pub use generators::{connected_topology, value_batch, Workload};
pub use sim::{SimStats, Simulation};
