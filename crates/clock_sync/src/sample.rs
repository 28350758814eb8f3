//! One round-trip measurement.

/// A single time request/reply pair
///
/// `device_time` is the device's seconds-since-epoch reading; the two local
/// times bracket the exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    pub local_send: f64,
    pub local_recv: f64,
    pub device_time: f64,
}

impl ClockSample {
    pub fn new(local_send: f64, local_recv: f64, device_time: f64) -> Self {
        Self {
            local_send,
            local_recv,
            device_time,
        }
    }

    /// Round-trip duration in seconds
    #[inline]
    pub fn round_trip(&self) -> f64 {
        self.local_recv - self.local_send
    }

    /// Device epoch expressed as a local time.
    ///
    /// Assumes a symmetric path: the device read its clock half a round
    /// trip before the reply landed.
    #[inline]
    pub fn differential(&self) -> f64 {
        self.local_recv - self.round_trip() / 2.0 - self.device_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_differential_symmetric_path() {
        // Device epoch at local 1000.0; device reads 5.0 at local 1005.0
        let sample = ClockSample::new(1004.9, 1005.1, 5.0);

        assert!((sample.round_trip() - 0.2).abs() < 1e-9);
        assert!((sample.differential() - 1000.0).abs() < 1e-9);
    }
}
