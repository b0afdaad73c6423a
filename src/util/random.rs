use std::time::Duration;
#[cfg(test)] use std::sync::Mutex;

use rand::{Rng, RngCore};

use crate::reqrep::frame::RequestId;


#[cfg(test)]
/// automock expectations for static methods are global - hold this lock to avoid races
pub static MOCK_RANDOM_MUTEX: Mutex<()> = Mutex::new(());

/// The randomness that request ids and the simulated network's loss and latency are drawn from
#[cfg_attr(test, mockall::automock)]
pub trait Random {
    /// a candidate id for a new request - it may collide with an outstanding one
    fn request_id() -> RequestId;
    /// `true` with the given probability, which is clamped to `[0, 1]`
    fn chance(probability: f64) -> bool;
    /// uniformly distributed between `min` and `max`, or `min` if the range is empty
    fn duration_between(min: Duration, max: Duration) -> Duration;
}
pub struct RngRandom {}
impl Random for RngRandom {
    fn request_id() -> RequestId {
        RequestId(rand::thread_rng().next_u32())
    }

    fn chance(probability: f64) -> bool {
        rand::thread_rng().gen_bool(probability.clamp(0.0, 1.0))
    }

    fn duration_between(min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}
