/// Decides on which draw ticks the full process list is re-sampled and
/// re-sorted. Between re-sorts only the visible rows are refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshCadence {
    resort_every: u32,
    draws_since_resort: u32,
    forced: bool,
}

impl RefreshCadence {
    /// A cadence re-sorting every `resort_every` draws. The first draw always
    /// re-sorts.
    pub fn new(resort_every: u32) -> Self {
        Self {
            resort_every: resort_every.max(1),
            draws_since_resort: 0,
            forced: true,
        }
    }

    pub fn is_resort_due(&self) -> bool {
        self.forced || self.draws_since_resort >= self.resort_every
    }

    pub fn record_resort(&mut self) {
        self.draws_since_resort = 0;
        self.forced = false;
    }

    pub fn record_draw(&mut self) {
        self.draws_since_resort = self.draws_since_resort.saturating_add(1);
    }

    /// Makes the next draw re-sort regardless of the cadence.
    pub fn force(&mut self) {
        self.forced = true;
    }
}
