pub mod flash_window;
pub mod frame;
pub mod frequency_rule;
pub mod pixel;
pub mod smart_pixel;
