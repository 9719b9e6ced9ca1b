pub mod playback;
pub mod spotify;
pub mod traits;

pub use playback::{PlaybackClient, PlaybackSnapshot, RateLimitGate};
pub use spotify::SpotifyProvider;
pub use traits::{OAuthProvider, ProviderProfile, TokenSet};

#[cfg(test)]
pub(crate) mod fake;
