use regex::Regex;
use std::sync::LazyLock;

use serde::Serialize;

static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^frame=\s*(\d+)").expect("invalid frame regex"));
static FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^fps=\s*([0-9]+\.?[0-9]*)").expect("invalid fps regex"));

/// Which slice of the overall encode a pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPass {
    /// The pass is reported on its own, 0..1.
    Single,
    /// Analysis pass of a two-pass encode, 0..0.5.
    First,
    /// Final pass of a two-pass encode, 0.5..1.
    Second,
}

impl ProgressPass {
    fn index(self) -> u64 {
        match self {
            ProgressPass::Second => 1,
            ProgressPass::Single | ProgressPass::First => 0,
        }
    }

    fn pass_count(self) -> u64 {
        match self {
            ProgressPass::Single => 1,
            ProgressPass::First | ProgressPass::Second => 2,
        }
    }

    /// Slice of the overall progress this pass may report.
    fn fraction_range(self) -> (f64, f64) {
        let count = self.pass_count() as f64;
        let index = self.index() as f64;
        (index / count, (index + 1.0) / count)
    }

    /// Number of fps lines treated as warm-up. The final pass waits longer so
    /// the estimate does not jump once progress crosses the halfway mark.
    fn warmup_lines(self) -> u32 {
        match self {
            ProgressPass::Second => 20,
            ProgressPass::Single | ProgressPass::First => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSample {
    /// Completion in [0, 1].
    pub fraction: f64,
    /// None while no usable fps is known yet.
    pub seconds_left: Option<u64>,
}

/// Turns the encoder's `-progress` stream into [`ProgressSample`]s.
///
/// `frame=` lines update the frame counter, `fps=` lines emit a sample.
/// During warm-up the previous pass's average fps stands in for the parsed
/// value and nothing is folded into this pass's average.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    pass: ProgressPass,
    frame_count: u64,
    previous_average_fps: Option<f64>,
    frame: u64,
    fps_lines: u32,
    fps_sum: f64,
    fps_samples: u32,
}

impl ProgressTracker {
    pub fn new(pass: ProgressPass, frame_count: u64, previous_average_fps: Option<f64>) -> Self {
        Self {
            pass,
            frame_count,
            previous_average_fps,
            frame: 0,
            fps_lines: 0,
            fps_sum: 0.0,
            fps_samples: 0,
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<ProgressSample> {
        let line = line.trim();

        if let Some(caps) = FRAME_RE.captures(line) {
            if let Ok(frame) = caps[1].parse::<u64>() {
                self.frame = frame;
            }
            return None;
        }

        let caps = FPS_RE.captures(line)?;
        self.fps_lines += 1;

        let fps = if self.fps_lines <= self.pass.warmup_lines() {
            self.previous_average_fps
        } else {
            let parsed = caps[1].parse::<f64>().ok()?;
            self.fps_sum += parsed;
            self.fps_samples += 1;
            Some(parsed)
        };

        let total_frames = (self.frame_count * self.pass.pass_count()).max(1);
        let current_frame = self.frame_count * self.pass.index() + self.frame;
        let (low, high) = self.pass.fraction_range();
        let fraction = (current_frame as f64 / total_frames as f64).clamp(low, high);

        let seconds_left = fps.filter(|f| *f > 0.0).map(|f| {
            let frames_left = total_frames.saturating_sub(current_frame) as f64;
            ((frames_left / f).floor() as u64).max(1)
        });

        Some(ProgressSample {
            fraction,
            seconds_left,
        })
    }

    /// Mean of the post-warm-up fps values, if any were seen.
    pub fn average_fps(&self) -> Option<f64> {
        (self.fps_samples > 0).then(|| self.fps_sum / f64::from(self.fps_samples))
    }
}
