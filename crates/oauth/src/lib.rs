//! OAuth 2.0 authorization-code login with PKCE for LMS instances, plus
//! token storage and transparent refresh.

pub mod callback_server;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod pkce;
pub mod storage;
pub mod token_source;
pub mod types;

pub use {
    callback_server::{CALLBACK_PATH, CallbackServer},
    exchange::TokenClient,
    flow::{
        DEFAULT_CALLBACK_PORT, FlowConfig, FlowMode, FlowState, OAuthFlow, OOB_REDIRECT_URI,
        Operator, TerminalOperator,
    },
    pkce::{generate_pkce, generate_state},
    storage::{
        FallbackTokenStore, FileTokenStore, KeyringTokenStore, TokenStore, open_token_store,
        validate_instance_name,
    },
    token_source::{AutoRefreshTokenSource, TokenRefresher},
    types::{OAuthToken, PkceChallenge, serialize_option_secret, serialize_secret},
};

pub use error::{Error, Result};
