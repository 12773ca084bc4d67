use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("http request to upstream sync endpoint failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned an unexpected sync response shape: {0}")]
    UnexpectedResponse(String),

    #[error("onboarding operation did not complete within the poll deadline")]
    OnboardingTimedOut,

    #[error("credential store error: {0}")]
    Credential(#[from] oauth_client::Error),

    #[error("account {0} has no access token to sync with")]
    MissingAccessToken(String),
}

pub type Result<T> = std::result::Result<T, Error>;
