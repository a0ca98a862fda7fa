pub mod helper;
pub mod terminal;

pub use helper::HelperConfig;
