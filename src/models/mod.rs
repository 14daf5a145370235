mod dlq;
mod draft;
pub mod event;
mod item;
mod publication;
mod settings;

pub use dlq::*;
pub use draft::*;
pub use event::*;
pub use item::*;
pub use publication::*;
pub use settings::*;
