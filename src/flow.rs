// Host-read flow control with watermark hysteresis.
//
// When the host staging queue climbs past the high watermark the link stops
// pulling bytes from the socket; reads resume once the queue drains below
// the low watermark.

const HIGH_WATER_HEADROOM: usize = 128;
const LOW_WATER: usize = 256;

pub struct FlowController {
    paused: bool,
    high: usize,
    low: usize,
}

impl FlowController {
    pub fn new(queue_capacity: usize) -> Self {
        let high = queue_capacity.saturating_sub(HIGH_WATER_HEADROOM);
        Self {
            paused: false,
            high,
            low: LOW_WATER.min(high / 2),
        }
    }

    /// Re-evaluate against the current queue depth. Returns true when the
    /// paused state changed.
    pub fn update(&mut self, depth: usize) -> bool {
        if !self.paused && depth >= self.high {
            self.paused = true;
            true
        } else if self.paused && depth <= self.low {
            self.paused = false;
            true
        } else {
            false
        }
    }

    pub fn may_read(&self) -> bool {
        !self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Host detached: never hold the gate closed across sessions.
    pub fn reset(&mut self) {
        self.paused = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pauses_at_high_watermark() {
        let mut flow = FlowController::new(4096);
        assert!(flow.may_read());
        assert!(!flow.update(4096 - 129));
        assert!(flow.may_read());
        assert!(flow.update(4096 - 128));
        assert!(!flow.may_read());
    }

    #[test]
    fn test_resumes_only_below_low_watermark() {
        let mut flow = FlowController::new(4096);
        flow.update(4000);
        assert!(flow.is_paused());
        // Still paused anywhere between the watermarks.
        assert!(!flow.update(1000));
        assert!(flow.is_paused());
        assert!(!flow.update(257));
        assert!(flow.is_paused());
        assert!(flow.update(256));
        assert!(flow.may_read());
    }

    #[test]
    fn test_no_chatter_between_watermarks() {
        let mut flow = FlowController::new(4096);
        for depth in [500, 2000, 3500, 300] {
            assert!(!flow.update(depth));
            assert!(flow.may_read());
        }
    }

    #[test]
    fn test_reset_reopens_gate() {
        let mut flow = FlowController::new(4096);
        flow.update(4095);
        assert!(flow.is_paused());
        flow.reset();
        assert!(flow.may_read());
    }

    #[test]
    fn test_tiny_capacity_keeps_watermarks_ordered() {
        let mut flow = FlowController::new(300);
        // high = 172, low = 86: pausing must still be reachable and sticky.
        assert!(flow.update(200));
        assert!(flow.is_paused());
        assert!(flow.update(80));
        assert!(flow.may_read());
    }
}
