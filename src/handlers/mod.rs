pub mod actions;
pub mod oauth;
pub mod transcripts;
