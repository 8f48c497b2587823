pub mod channel;
pub mod credential;
pub mod token;
pub mod user;

pub use channel::{Channel, ChannelLookup, NewChannel, NewSecret, Secret};
pub use credential::{Credential, CredentialType};
pub use token::{
    Assertion, InvalidationMask, ProfileLookup, RequestProfile, SignaturePair, TokenKind,
    TokenRecord, TokenSignature,
};
pub use user::{User, UserOtp};
