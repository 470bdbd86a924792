pub mod catalog;
pub mod channel;
pub mod config;
pub mod navigation;
pub mod overlay;
pub mod platform;
pub mod playback;
pub mod prefs;
pub mod protocol;
pub mod resolver;
pub mod source;
