//! pixiv-relay library
//!
//! Watches chat messages for pixiv artwork links and answers with the
//! post's media: a static page, or an animation transcoded to webm or gif.

pub mod channels;
pub mod cli;
pub mod config;
pub mod logging;
pub mod media;
pub mod pixiv;
pub mod relay;
pub mod whitelist;
