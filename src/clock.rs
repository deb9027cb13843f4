//! Simulation clock driven by the frame driver.
//!
//! The driver owns the real frame time and hands it in once per frame with
//! [`SimulationClock::advance`]. The clock turns that into the simulation
//! time, the step size and the step counter the schemes see.
//!
//! # Example
//!
//! ```ignore
//! let mut clock = SimulationClock::new().with_fixed_delta(0.005);
//!
//! // once per frame
//! let tick = clock.advance(now_secs);
//! if tick.running {
//!     scheme.simulate(&mut ctx, tick.time, tick.step)?;
//! }
//! ```

/// What one frame means to the simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    /// Simulation time in seconds, scaled and excluding paused spans.
    pub time: f32,
    /// Step size of this tick.
    pub dt: f32,
    /// Step counter. Consecutive running ticks differ by one.
    pub step: u64,
    /// `false` while paused; the step counter does not move.
    pub running: bool,
}

#[derive(Debug)]
pub struct SimulationClock {
    /// Frame time of the previous call, in driver seconds.
    last_frame: Option<f64>,
    /// Scaled simulation time in seconds.
    elapsed_secs: f32,
    delta_secs: f32,
    step: u64,
    /// Frames seen, paused or not.
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Option<f64>,
    /// How often to update FPS calculation, in seconds.
    fps_update_interval: f64,
    paused: bool,
    /// Fixed delta time for deterministic updates (optional).
    fixed_delta: Option<f32>,
    /// Time scale multiplier (1.0 = normal speed).
    time_scale: f32,
}

impl SimulationClock {
    pub fn new() -> Self {
        Self {
            last_frame: None,
            elapsed_secs: 0.0,
            delta_secs: 0.0,
            step: 0,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: None,
            fps_update_interval: 0.5,
            paused: false,
            fixed_delta: None,
            time_scale: 1.0,
        }
    }

    pub fn with_fixed_delta(mut self, delta: f32) -> Self {
        self.fixed_delta = Some(delta);
        self
    }

    /// Feed the driver's current time in seconds. Call once per frame.
    pub fn advance(&mut self, now: f64) -> Tick {
        let raw_delta = self
            .last_frame
            .map(|last| (now - last).max(0.0) as f32)
            .unwrap_or(0.0);
        self.last_frame = Some(now);
        self.frame_count += 1;
        self.update_fps(now);

        if self.paused {
            self.delta_secs = 0.0;
            return self.tick(false);
        }

        self.delta_secs = self.fixed_delta.unwrap_or(raw_delta) * self.time_scale;
        self.elapsed_secs += self.delta_secs;
        self.step += 1;
        self.tick(true)
    }

    fn tick(&self, running: bool) -> Tick {
        Tick {
            time: self.elapsed_secs,
            dt: self.delta_secs,
            step: self.step,
            running,
        }
    }

    fn update_fps(&mut self, now: f64) {
        let since = match self.fps_update_time {
            Some(since) => since,
            None => {
                self.fps_update_time = Some(now);
                self.fps_frame_count = self.frame_count;
                return;
            }
        };
        let window = now - since;
        if window >= self.fps_update_interval {
            let frames = self.frame_count - self.fps_frame_count;
            self.fps = (frames as f64 / window) as f32;
            self.fps_frame_count = self.frame_count;
            self.fps_update_time = Some(now);
        }
    }

    /// Simulation time in seconds.
    #[inline]
    pub fn elapsed(&self) -> f32 {
        self.elapsed_secs
    }

    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    #[inline]
    pub fn step(&self) -> u64 {
        self.step
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[inline]
    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// While paused, ticks report `running: false` and the step counter holds.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume after [`pause`](Self::pause). The next tick continues the step
    /// sequence without a gap.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Pass `None` to use real frame timing.
    pub fn set_fixed_delta(&mut self, delta: Option<f32>) {
        self.fixed_delta = delta;
    }

    /// Negative scales clamp to zero.
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    /// Restart time and the step counter.
    ///
    /// The next tick is step 1, which breaks step continuity for any scheme
    /// that has run since, so seeded schemes start over.
    pub fn reset(&mut self) {
        self.last_frame = None;
        self.elapsed_secs = 0.0;
        self.delta_secs = 0.0;
        self.step = 0;
        self.paused = false;
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new()
    }
}
