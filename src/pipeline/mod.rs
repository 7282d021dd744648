//! Pipeline orchestration: policies, conversion, account locks and the run itself

pub mod convert;
pub mod core;
pub mod lock;
pub mod policy;

pub use convert::*;
pub use self::core::*;
pub use lock::*;
pub use policy::*;
