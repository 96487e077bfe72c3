pub mod health;
pub mod inventory;
pub mod metrics;
pub mod queue;
pub mod violations;
