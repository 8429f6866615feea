use std::time::Duration;

/// Countdown shape: total delay between a positive decision and the shutter,
/// split into evenly spaced steps so the user can be shown "photo in 3s...
/// 2s... 1s" style cues.
#[derive(Debug, Clone, Copy)]
pub struct CountdownConfig {
    pub total: Duration,
    pub steps: u32,
}

impl CountdownConfig {
    pub fn new(total: Duration, steps: u32) -> Self {
        debug_assert!(steps > 0, "countdown needs at least one step");
        Self { total, steps }
    }

    pub fn step_duration(&self) -> Duration {
        self.total / self.steps
    }
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            total: Duration::from_millis(3000),
            steps: 3,
        }
    }
}

/// Handed to the owner when a trigger arms the sequencer; everything a
/// countdown timer task needs to schedule its ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub request_id: u64,
    pub steps: u32,
    pub step_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// No capture pending.
    Idle,
    /// Countdown running toward a shutter fire.
    Armed {
        request_id: u64,
        remaining_steps: u32,
    },
    /// Shutter command issued, waiting for the image bytes.
    Firing { request_id: u64 },
}

/// Outcome of delivering one countdown tick to the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The tick belongs to a request that is no longer armed. Dropped.
    Stale,
    /// Countdown advanced; `remaining` steps left before the shutter.
    Cue { remaining: u32 },
    /// Countdown elapsed; the owner must issue the shutter command now.
    Fire,
}

/// The capture state machine.
///
/// At most one request is ever armed or firing. Triggers while a request is
/// live are dropped, not queued. Timer tasks are never cancelled directly:
/// every tick carries the request id it was scheduled for, and ticks whose id
/// no longer matches the live request are discarded as stale. The ids are
/// monotonic across the life of the sequencer, so a countdown scheduled
/// before a pause can never fire into a session resumed afterwards.
#[derive(Debug)]
pub struct CaptureSequencer {
    state: SequencerState,
    next_request_id: u64,
    countdown: CountdownConfig,
}

impl CaptureSequencer {
    pub fn new(countdown: CountdownConfig) -> Self {
        Self {
            state: SequencerState::Idle,
            next_request_id: 1,
            countdown,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, SequencerState::Idle)
    }

    /// Arm a new capture request, or return `None` if one is already live.
    pub fn trigger(&mut self) -> Option<CaptureRequest> {
        if !self.is_idle() {
            return None;
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.state = SequencerState::Armed {
            request_id,
            remaining_steps: self.countdown.steps,
        };

        Some(CaptureRequest {
            request_id,
            steps: self.countdown.steps,
            step_duration: self.countdown.step_duration(),
        })
    }

    /// Advance the countdown for `request_id` by one step.
    pub fn tick(&mut self, request_id: u64) -> Tick {
        match self.state {
            SequencerState::Armed {
                request_id: armed_id,
                remaining_steps,
            } if armed_id == request_id => {
                let remaining = remaining_steps - 1;
                if remaining == 0 {
                    self.state = SequencerState::Firing { request_id };
                    Tick::Fire
                } else {
                    self.state = SequencerState::Armed {
                        request_id,
                        remaining_steps: remaining,
                    };
                    Tick::Cue { remaining }
                }
            }
            _ => Tick::Stale,
        }
    }

    /// Mark the firing request as completed (image handed off, preview
    /// resumed). Stale ids from an earlier cycle are ignored.
    pub fn complete(&mut self, request_id: u64) -> bool {
        match self.state {
            SequencerState::Firing {
                request_id: firing_id,
            } if firing_id == request_id => {
                self.state = SequencerState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Drop any live request. Returns whether one was live. Used both when
    /// the session tears down mid-countdown and when a capture fails.
    pub fn cancel(&mut self) -> bool {
        let was_live = !self.is_idle();
        self.state = SequencerState::Idle;
        was_live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer() -> CaptureSequencer {
        CaptureSequencer::new(CountdownConfig::default())
    }

    #[test]
    fn test_trigger_from_idle_arms() {
        let mut seq = sequencer();
        let req = seq.trigger().unwrap();
        assert_eq!(req.steps, 3);
        assert_eq!(req.step_duration, Duration::from_millis(1000));
        assert_eq!(
            seq.state(),
            SequencerState::Armed {
                request_id: req.request_id,
                remaining_steps: 3
            }
        );
    }

    #[test]
    fn test_second_trigger_while_armed_is_dropped() {
        let mut seq = sequencer();
        let req = seq.trigger().unwrap();
        assert!(seq.trigger().is_none());
        // Original countdown untouched
        assert_eq!(
            seq.state(),
            SequencerState::Armed {
                request_id: req.request_id,
                remaining_steps: 3
            }
        );
    }

    #[test]
    fn test_countdown_cues_then_fires() {
        let mut seq = sequencer();
        let req = seq.trigger().unwrap();
        assert_eq!(seq.tick(req.request_id), Tick::Cue { remaining: 2 });
        assert_eq!(seq.tick(req.request_id), Tick::Cue { remaining: 1 });
        assert_eq!(seq.tick(req.request_id), Tick::Fire);
        assert_eq!(
            seq.state(),
            SequencerState::Firing {
                request_id: req.request_id
            }
        );
    }

    #[test]
    fn test_single_step_countdown_fires_immediately() {
        let mut seq = CaptureSequencer::new(CountdownConfig::new(Duration::from_secs(3), 1));
        let req = seq.trigger().unwrap();
        assert_eq!(req.step_duration, Duration::from_secs(3));
        assert_eq!(seq.tick(req.request_id), Tick::Fire);
    }

    #[test]
    fn test_tick_with_wrong_id_is_stale() {
        let mut seq = sequencer();
        let req = seq.trigger().unwrap();
        assert_eq!(seq.tick(req.request_id + 1), Tick::Stale);
        // Countdown unaffected
        assert_eq!(seq.tick(req.request_id), Tick::Cue { remaining: 2 });
    }

    #[test]
    fn test_tick_after_cancel_is_stale() {
        let mut seq = sequencer();
        let req = seq.trigger().unwrap();
        assert!(seq.cancel());
        assert_eq!(seq.tick(req.request_id), Tick::Stale);
        assert!(seq.is_idle());
    }

    #[test]
    fn test_trigger_while_firing_is_dropped() {
        let mut seq = sequencer();
        let req = seq.trigger().unwrap();
        seq.tick(req.request_id);
        seq.tick(req.request_id);
        assert_eq!(seq.tick(req.request_id), Tick::Fire);
        assert!(seq.trigger().is_none());
    }

    #[test]
    fn test_complete_returns_to_idle() {
        let mut seq = sequencer();
        let req = seq.trigger().unwrap();
        for _ in 0..3 {
            seq.tick(req.request_id);
        }
        assert!(seq.complete(req.request_id));
        assert!(seq.is_idle());
    }

    #[test]
    fn test_complete_with_stale_id_is_ignored() {
        let mut seq = sequencer();
        let req = seq.trigger().unwrap();
        for _ in 0..3 {
            seq.tick(req.request_id);
        }
        assert!(!seq.complete(req.request_id + 7));
        assert_eq!(
            seq.state(),
            SequencerState::Firing {
                request_id: req.request_id
            }
        );
    }

    #[test]
    fn test_request_ids_are_monotonic_across_cycles() {
        let mut seq = sequencer();
        let first = seq.trigger().unwrap();
        seq.cancel();
        let second = seq.trigger().unwrap();
        assert!(second.request_id > first.request_id);
        // Ticks scheduled for the cancelled request stay dead
        assert_eq!(seq.tick(first.request_id), Tick::Stale);
    }

    #[test]
    fn test_cancel_when_idle_reports_nothing_live() {
        let mut seq = sequencer();
        assert!(!seq.cancel());
    }
}
