pub mod derive;
pub mod format;
pub mod schema;

pub use derive::{read, read_current, InputKey, Memo, Point, Section, Status, Upstream};
pub use format::Readout;
