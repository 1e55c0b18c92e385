//! Brings the driver traits into scope.

pub use crate::{BlockDevice as _, Socket as _};
