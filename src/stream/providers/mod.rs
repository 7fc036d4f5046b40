//! Upstream source providers

pub mod animelok;
pub mod animeya;
pub mod custom;
pub mod hindi_dubbed;
pub mod primary;
pub mod watchanimeworld;

pub use animelok::AnimelokProvider;
pub use animeya::AnimeyaProvider;
pub use custom::CustomSourceProvider;
pub use hindi_dubbed::HindiDubbedProvider;
pub use primary::{CatalogClient, PrimaryCatalogProvider};
pub use watchanimeworld::WatchAnimeWorldProvider;
