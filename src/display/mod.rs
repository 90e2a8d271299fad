//! Result presentation

pub mod overlay;
pub mod presenter;

pub use overlay::{OverlayBox, Tone};
pub use presenter::{LogPresenter, Presenter};
