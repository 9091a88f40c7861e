#[allow(unused_imports)]
pub use crate::error::{Error, Result};
#[allow(unused_imports)]
pub use log::{debug, error, info, trace, warn};
