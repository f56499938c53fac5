#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportClock {
    schedule_offset: f64,
    duration: f64,
    last_elapsed: f64,
}

impl TransportClock {
    #[must_use]
    pub fn new(duration: f64) -> Self {
        Self {
            schedule_offset: 0.0,
            duration: duration.max(0.0),
            last_elapsed: 0.0,
        }
    }

    pub fn reset(&mut self, schedule_offset: f64) {
        self.schedule_offset = schedule_offset.max(0.0);
        self.last_elapsed = 0.0;
    }

    #[must_use]
    pub fn schedule_offset(&self) -> f64 {
        self.schedule_offset
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn current_position(&mut self, graph_elapsed: f64) -> f64 {
        self.last_elapsed = graph_elapsed.max(0.0);
        self.clamp(self.schedule_offset + self.last_elapsed)
    }

    /// Unclamped position; only end-of-track detection should look past `duration`.
    #[must_use]
    pub fn raw_position(&self, graph_elapsed: f64) -> f64 {
        self.schedule_offset + graph_elapsed.max(0.0)
    }

    #[must_use]
    pub fn last_position(&self) -> f64 {
        self.clamp(self.schedule_offset + self.last_elapsed)
    }

    fn clamp(&self, position: f64) -> f64 {
        position.clamp(0.0, self.duration)
    }
}
