//! Control surface: admission/overhead arithmetic, worker lifecycle, and
//! out-of-band mode switches via sentinel files.

pub mod admission;
pub mod lifecycle;
pub mod mode;
