//! Code-assist OAuth constants
//!
//! Public OAuth client configuration matching the upstream CLI tooling these
//! accounts are provisioned through. These values are not secrets — they
//! identify the public client application. The actual secrets (access/refresh
//! tokens) are managed by the credential store.

/// Public OAuth client id used by the generic-CLI integration path.
pub const CLIENT_ID: &str = "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";

/// Installed-app client "secret" paired with `CLIENT_ID`. Published alongside
/// the client id by the upstream CLI tooling; not sensitive for an installed
/// (PKCE) application, but required by the token endpoint as a form field.
pub const CLIENT_SECRET: &str = "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";

/// Loopback redirect used to complete the authorization code flow.
pub const REDIRECT_URI: &str = "http://localhost:8085/oauth2callback";

/// Token endpoint for code exchange and token refresh. Shared by both
/// client kinds — only the downstream API base differs.
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Authorization endpoint for the interactive consent screen.
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// OAuth scopes required for code-assist inference access.
pub const SCOPES: &str =
    "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/userinfo.email";

/// API base for the GENERIC_CLI client kind (the `loadCodeAssist` /
/// `onboardUser` / `generateContent` internal code-assist surface).
pub const GENERIC_CLI_API_BASE: &str = "https://cloudcode-pa.googleapis.com/v1internal";

/// API base for the NATIVE client kind (the public generative-language
/// surface used by `fetchAvailableModels` / `generateContent`).
pub const NATIVE_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
