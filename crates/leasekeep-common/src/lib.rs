pub mod error;
pub mod time;
pub mod token;

pub use error::{BackendError, BackendResult};
pub use time::{Clock, ManualClock, SystemClock};
pub use token::HolderToken;
