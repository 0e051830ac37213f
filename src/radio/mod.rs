pub mod link;
pub mod params;
#[cfg(feature = "embedded")]
pub mod sx1262;
pub mod traits;

pub use link::{ChannelProfile, Link, LinkStats};
pub use params::{Bandwidth, ParamError, RadioParameters};
pub use traits::{RxFrame, Transport, TransportError};
