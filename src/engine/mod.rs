pub mod fuel;
pub mod physics;

pub use fuel::{FuelConfig, FuelControl, FuelResult};
pub use physics::{EnginePhysics, PhysicsConfig, TorqueBalance};
