pub mod engine;

pub use engine::CryptoEngine;
