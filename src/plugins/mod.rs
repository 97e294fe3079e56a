//! Prospectus subsystems.

pub mod analysis;
pub mod form;
pub mod generation;
pub mod normalize;
pub mod placeholders;
pub mod profiles;
pub mod templates;
pub mod versions;
