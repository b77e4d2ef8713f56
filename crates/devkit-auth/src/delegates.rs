use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    BearerCredential, DelegateError, DelegatedCredential, IdentityDelegate, Prompt, TextInputSpec,
};

pub const PAT_PROMPT: &str = "Enter your Azure DevOps Personal Access Token (PAT)";
const PAT_PLACEHOLDER: &str = "Personal Access Token";

/// Delegate backed by a personal access token, either preset or typed in.
pub struct PersonalTokenDelegate {
    prompt: Arc<dyn Prompt>,
    preset: Option<BearerCredential>,
}

impl PersonalTokenDelegate {
    pub fn new(prompt: Arc<dyn Prompt>) -> Self {
        Self {
            prompt,
            preset: None,
        }
    }

    /// Uses `token` instead of prompting.
    pub fn with_token(mut self, token: BearerCredential) -> Self {
        self.preset = Some(token);
        self
    }
}

#[async_trait]
impl IdentityDelegate for PersonalTokenDelegate {
    fn delegate_name(&self) -> &'static str {
        "personal-access-token"
    }

    fn is_interactive(&self) -> bool {
        self.preset.is_none()
    }

    async fn acquire(&self, _scope_hint: &str) -> Result<DelegatedCredential, DelegateError> {
        if let Some(token) = &self.preset {
            return Ok(DelegatedCredential::new(token.clone()));
        }
        let spec = TextInputSpec {
            prompt: PAT_PROMPT.to_string(),
            placeholder: Some(PAT_PLACEHOLDER.to_string()),
            password: true,
        };
        self.prompt
            .input_text(&spec)
            .await
            .and_then(BearerCredential::new)
            .map(DelegatedCredential::new)
            .ok_or_else(|| DelegateError::new("PAT is required for authentication"))
    }
}
