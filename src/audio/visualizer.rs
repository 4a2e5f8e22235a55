//! Waveform view of live microphone input.
//!
//! Purely observational: the visualizer reads a block, draws a polyline and
//! returns nothing. Nothing in the pipeline depends on what it draws.

/// Drawing surface for a waveform polyline.
pub trait Canvas {
    /// Width and height in canvas units.
    fn size(&self) -> (f32, f32);
    fn clear(&mut self);
    fn move_to(&mut self, x: f32, y: f32);
    fn line_to(&mut self, x: f32, y: f32);
}

/// A canvas that records the polyline it was asked to draw.
///
/// This is what gets handed to UI observers; they can replay the points onto
/// whatever surface they own.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub width: f32,
    pub height: f32,
    pub points: Vec<(f32, f32)>,
}

impl Waveform {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            points: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Default for Waveform {
    fn default() -> Self {
        Self::new(512.0, 128.0)
    }
}

impl Canvas for Waveform {
    fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        self.points.clear();
    }

    fn move_to(&mut self, x: f32, y: f32) {
        self.points.clear();
        self.points.push((x, y));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.points.push((x, y));
    }
}

/// Maps samples to vertical offsets around the center line.
#[derive(Debug, Clone)]
pub struct Visualizer {
    gain: f32,
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Visualizer {
    pub fn new(gain: f32) -> Self {
        let gain = if gain.is_finite() { gain } else { 1.0 };
        Self { gain }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Draw `samples` across the full canvas width.
    ///
    /// An empty block draws nothing and leaves the canvas untouched. Samples
    /// that are not finite are drawn on the center line; the scaled offset is
    /// clamped so a hot signal stays inside the canvas.
    pub fn render(&self, samples: &[f32], canvas: &mut dyn Canvas) {
        if samples.is_empty() {
            return;
        }

        let (width, height) = canvas.size();
        let center = height / 2.0;
        let step = width / samples.len() as f32;

        canvas.clear();
        for (i, &sample) in samples.iter().enumerate() {
            let sample = if sample.is_finite() { sample } else { 0.0 };
            let x = i as f32 * step;
            let y = center - (sample * self.gain).clamp(-1.0, 1.0) * center;
            if i == 0 {
                canvas.move_to(x, y);
            } else {
                canvas.line_to(x, y);
            }
        }
    }

    /// Render into a fresh [`Waveform`] of the given size.
    pub fn trace(&self, samples: &[f32], width: f32, height: f32) -> Waveform {
        let mut waveform = Waveform::new(width, height);
        self.render(samples, &mut waveform);
        waveform
    }
}
