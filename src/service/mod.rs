pub mod caller;
pub mod exchanger;
pub mod guard;
pub mod refresher;

pub use caller::ResilientCaller;
pub use exchanger::OAuthExchanger;
pub use guard::CredentialGuard;
pub use refresher::TokenRefresher;
