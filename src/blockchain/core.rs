// core.rs splits responsibilities into submodules for easier maintenance.
pub mod chain;
pub mod validation;

pub use self::chain::*;
pub use self::validation::*;
