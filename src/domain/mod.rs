pub mod actuator;
pub mod camera;
pub mod peripheral;
pub mod schedule;
pub mod sensor;

pub use actuator::*;
pub use camera::*;
pub use peripheral::*;
pub use schedule::*;
pub use sensor::*;
