//! Display objects: glue between scene data and the primitive encoders.
//!
//! A display object owns the primitives it renders, rebuilds them when the
//! renderer refuses a new setting or the device session changed, and refills
//! their buffers only when a [`CacheHelper`] reports changed inputs.

pub use self::bonds::{half_bonds, Bond, BondsDisplay, HalfBond, SimulationCell};
pub use self::cache_helper::CacheHelper;
pub use self::particles::{automatic_quality, particle_colors, ParticleData, ParticleDisplay, Property};

mod bonds;
mod cache_helper;
mod particles;
