pub mod key;
pub mod snapshot;
pub mod tracked;

pub use key::*;
pub use snapshot::*;
pub use tracked::*;
