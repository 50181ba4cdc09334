//! ORSim Simulation Harness
//!
//! Runs whole populations of ORSim agents in one process, with a scheduler
//! stand-in, so lifecycle and fault handling can be exercised end to end.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌───────────────┐                                          │
//! │  │ LocalScheduler│── step/shutdown ──┐                      │
//! │  └───────▲───────┘                   ▼                      │
//! │          │               ┌─────────────────────┐            │
//! │      responses           │   InMemoryBroker    │◄─ isolate  │
//! │          │               └──┬──────┬───────┬───┘   / heal   │
//! │          └──────────────────┤      │       │                │
//! │                        ┌────▼──┐ ┌─▼─────┐ ┌▼──────┐        │
//! │                        │ Agent │ │ Agent │ │ Agent │  ...   │
//! │                        │ (Sim  │ │       │ │       │        │
//! │                        │ Ctx)  │ │       │ │       │        │
//! │                        └───────┘ └───────┘ └───────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each agent gets its own [`SimContext`], so a step timeout of many
//! seconds is crossed in a few real milliseconds without agents' heartbeats
//! pushing each other's clocks.
//!
//! # Usage
//!
//! ```ignore
//! use orsim_sim::{RunnerConfig, ScenarioRunner};
//! use orsim_sim::scenarios::ScenarioId;
//!
//! let runner = ScenarioRunner::new(RunnerConfig { seed: 7, ..Default::default() });
//! let result = runner.run(ScenarioId::Stall).await?;
//! assert!(result.passed);
//! ```

mod bus;
mod context;
mod error;
pub mod processors;
mod runner;
pub mod scenarios;
mod scheduler;

pub use bus::{BrokerController, BrokerStats, BusClient, InMemoryBroker};
pub use context::SimContext;
pub use error::SimError;
pub use processors::{FaultyProcessor, StallingProcessor, TransitionWalker};
pub use runner::{RunnerConfig, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scheduler::{BarrierReport, LocalScheduler};
