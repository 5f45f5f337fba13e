//! Imagegen Core Library
//! Rate-limited, key-shielding proxy for an image generation API

pub mod config;
pub mod conversation;
pub mod proxy;
