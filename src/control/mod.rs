pub mod policy;

pub use policy::{decide, ActuatorCommand};
