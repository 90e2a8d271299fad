use log::{debug, info};

use super::overlay::OverlayBox;
use crate::pipeline::StatsSnapshot;
use crate::utils::net::protocol::DetectionResult;

/// Consumer of detection results
pub trait Presenter: Send {
    /// Replace the overlay with `result`, annotated with the current stats.
    fn render(&mut self, result: &DetectionResult, stats: &StatsSnapshot);

    /// Remove the overlay.
    fn clear(&mut self);
}

/// Presenter that writes the overlay to the log
pub struct LogPresenter {
    viewport: (u32, u32),
    last: Vec<OverlayBox>,
}

impl LogPresenter {
    pub fn new(viewport: (u32, u32)) -> Self {
        Self {
            viewport,
            last: Vec::new(),
        }
    }
}

impl Presenter for LogPresenter {
    fn render(&mut self, result: &DetectionResult, stats: &StatsSnapshot) {
        self.last = result
            .objects
            .iter()
            .map(|object| OverlayBox::from_object(object, self.viewport))
            .collect();

        info!("Overlay: {} | {} object(s)", stats, self.last.len());
        for b in &self.last {
            debug!(
                "Overlay: [{:?}] {} at ({:.0}, {:.0}) {:.0}x{:.0}",
                b.tone, b.caption, b.left, b.top, b.width, b.height
            );
        }
    }

    fn clear(&mut self) {
        self.last.clear();
        debug!("Overlay: cleared");
    }
}
