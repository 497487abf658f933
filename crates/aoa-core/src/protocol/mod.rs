//! Protocol module - AOA protocol definitions.

pub mod classify;
pub mod constants;
pub mod identity;

pub use classify::{DeviceClass, classify};
pub use constants::*;
pub use identity::{AccessoryIdentity, IdentityError, StringIndex};
