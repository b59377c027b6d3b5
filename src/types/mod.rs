pub mod action;
pub mod credential;
pub mod provider;
pub mod transcript;

pub use action::{MeetingKind, ProviderAction, ProviderRequest, ProviderResponse, TaskDraft};
pub use credential::{
    AccountIdentity, ConnectionResult, ConnectionSummary, Credential, CredentialKey, TokenGrant,
    max_token_lifetime,
};
pub use provider::Provider;
pub use transcript::{Transcript, TranscriptWebhook};
