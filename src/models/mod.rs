pub mod consultation;
pub mod context;
pub mod document;
pub mod enums;
pub mod patient;
pub mod progress;
pub mod transcript;

pub use consultation::*;
pub use context::*;
pub use document::*;
pub use enums::*;
pub use patient::*;
pub use progress::*;
pub use transcript::*;
