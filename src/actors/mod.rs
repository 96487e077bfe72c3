//! Background workers of an ingestion process
//!
//! Each actor runs as an independent tokio task with an mpsc command channel,
//! controlled through a cloneable handle.
//!
//! ## Architecture Overview
//!
//! ```text
//!   topic "host"      topic "container"     topic "localhost"
//!        │                   │                      │
//!  ┌─────▼──────┐     ┌──────▼─────┐         ┌──────▼─────┐
//!  │IntakeActor │ ... │IntakeActor │   ...   │IntakeActor │   (N per topic)
//!  └─────┬──────┘     └──────┬─────┘         └──────┬─────┘
//!        └───────────────────┼──────────────────────┘
//!                            │ IntakePipeline
//!         ┌──────────────────┼─────────────────────┐
//!         ▼                  ▼                     ▼
//!  raw broadcast       LivenessMonitor      MetricForwarder
//!  (bounded, drops           │                     │
//!   oldest)            ┌─────▼───────┐             ▼
//!         │            │LivenessActor│──►  ViolationSink (hub)
//!  ┌──────▼─────┐      └─────────────┘             ▲
//!  │FanoutActor │                                  │
//!  └──────┬─────┘      ┌─────────────┐      threshold replica
//!         ▼            │ReplicaActor │──────────────►│
//!   websocket sessions └─────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **IntakeActor**: polls one topic for its consumer group and commits batches
//! - **LivenessActor**: sweeps for silent machines and reports timeouts
//! - **FanoutActor**: delivers raw metrics to websocket sessions, sweeps closed ones
//! - **ReplicaActor**: refreshes the local threshold replica from the hub

pub mod fanout;
pub mod intake;
pub mod liveness;
pub mod messages;
pub mod replica;
