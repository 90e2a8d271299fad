//! Overlay geometry for detection results

use crate::assets::CONFIDENT_THRESHOLD;
use crate::utils::net::protocol::DetectedObject;

/// Stroke tone of a box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Confident,
    Tentative,
}

/// One detection mapped onto the viewport, in pixels
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub tone: Tone,
    pub caption: String,
}

impl OverlayBox {
    /// Objects carry a normalized centre and size; the box is drawn around the
    /// centre.
    pub fn from_object(object: &DetectedObject, viewport: (u32, u32)) -> Self {
        let (vw, vh) = (f64::from(viewport.0), f64::from(viewport.1));
        let width = object.width * vw;
        let height = object.height * vh;
        Self {
            left: object.x * vw - width / 2.0,
            top: object.y * vh - height / 2.0,
            width,
            height,
            tone: if object.confidence > CONFIDENT_THRESHOLD {
                Tone::Confident
            } else {
                Tone::Tentative
            },
            caption: caption(object),
        }
    }
}

/// `label NN%`, followed by the pH reading when the service supplies one
pub fn caption(object: &DetectedObject) -> String {
    let mut text = format!("{} {:.0}%", object.label, object.confidence * 100.0);
    if let Some(ph) = object.ph_value() {
        text.push_str(&format!(" pH: {}", ph));
    }
    text
}
