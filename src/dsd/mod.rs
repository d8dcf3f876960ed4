//! DSD stream handling: container parsing, planar layout, DoP framing

pub mod dop;
pub mod format;
pub mod reader;

pub use dop::DopEncoder;
pub use format::{rate_name, DsdContainer, DsdFormat};
pub use reader::DsdStreamReader;
