//! ORSim Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam between the agent runtime and the
//! world it runs in. The runtime never touches a socket or the system clock
//! directly; it goes through two traits:
//!
//! - [`AgentContext`] - time (`now()`, `sleep()`) and task spawning
//! - [`MessageBus`] - topic based publish/subscribe transport
//!
//! Production deployments plug in [`TokioContext`] and a broker client;
//! the `orsim_sim` harness plugs in a virtual clock and an in-memory broker,
//! so the same lifecycle code runs in both.
//!
//! # Example
//!
//! ```ignore
//! use orsim_env::{AgentContext, MessageBus};
//!
//! async fn listen<Ctx: AgentContext, Bus: MessageBus>(ctx: &Ctx, bus: &Bus) {
//!     loop {
//!         tokio::select! {
//!             msg = bus.recv() => handle(msg),
//!             _ = ctx.sleep(Duration::from_secs(5)) => heartbeat(),
//!         }
//!     }
//! }
//! ```

mod context;
mod bus;
mod types;
mod error;
mod tokio_impl;

pub use context::AgentContext;
pub use bus::MessageBus;
pub use types::{AgentCredentials, BusMessage, SessionId};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
