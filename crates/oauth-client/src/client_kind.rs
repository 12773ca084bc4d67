//! Client-kind distinction
//!
//! `GenericCli` accounts are onboarded through the internal code-assist
//! surface (`loadCodeAssist` / `onboardUser` / `retrieveUserQuota`) and speak
//! the GENERIC_CLI header style. `Native` accounts speak the public
//! generative-language surface (`fetchAvailableModels` / `generateContent` /
//! `streamGenerateContent`) and are the only kind the forwarder ever uses for
//! its own outbound calls.

use serde::{Deserialize, Serialize};

use crate::constants::{GENERIC_CLI_API_BASE, NATIVE_API_BASE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientKind {
    GenericCli,
    Native,
}

impl ClientKind {
    pub fn api_base(self) -> &'static str {
        match self {
            ClientKind::GenericCli => GENERIC_CLI_API_BASE,
            ClientKind::Native => NATIVE_API_BASE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientKind::GenericCli => "GENERIC_CLI",
            ClientKind::Native => "NATIVE",
        }
    }
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
