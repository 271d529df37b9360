pub mod client;
pub mod config;
pub mod encoder;
pub mod orchestrator;
pub mod prompt;
pub mod runner;

pub use client::{DryrunClient, GeminiClient, GenerationClient, GenerationRequest};
pub use config::{ClientConfig, SharedCredential};
pub use encoder::{AssetId, ImageAsset};
pub use orchestrator::{
    CredentialSelector, Dispatch, Notice, Orchestrator, Preview, RequestToken, Resolution,
    SlotState,
};
pub use runner::{SessionRunner, WaitReport};
