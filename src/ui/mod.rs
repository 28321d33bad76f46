//! Terminal User Interface components for cno-query.

mod help;
pub mod picker;
pub mod theme;
pub mod widgets;

pub use help::HelpOverlay;
pub use picker::{MunicipalityPicker, PickerPopup};
pub use theme::Theme;
