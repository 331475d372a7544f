mod ecs;
mod status;

pub use ecs::*;
pub use status::*;

/// Converts a millisecond unix timestamp into the fractional epoch-seconds
/// representation used on the AWS JSON wire.
pub fn epoch_seconds(ms: i64) -> f64 {
    (ms as f64) / 1000.0
}
