//! LLM provider setup flow
//!
//! provider → setup_confirm → api_key, with verification failures looping
//! back to `api_key`.

use anyhow::Context;
use bi_agent_core::flow::{Answers, FlowDefinition, FlowResult, Question};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

use crate::credentials::{CredentialStore, Provider};

/// Flow id of the auth setup flow
pub const AUTH_FLOW_ID: &str = "auth_setup";

/// Build the provider setup flow around `store`
pub fn auth_setup_flow(store: Arc<dyn CredentialStore>) -> FlowDefinition {
    let providers = Provider::ALL.map(|p| (p.as_str(), p.label()));

    FlowDefinition::new(
        AUTH_FLOW_ID,
        "LLM provider setup",
        "provider",
        move |answers: Answers| {
            let store = Arc::clone(&store);
            async move { complete(store.as_ref(), &answers).await }
        },
    )
    .with_question(
        Question::choice("provider", "Which LLM provider should the agent use?", providers)
            .then("setup_confirm"),
    )
    .with_question(
        Question::confirm("setup_confirm", "Continue with API key setup?")
            .with_dynamic_prompt(|answers| {
                let provider = chosen_provider(answers)?;
                Ok(format!(
                    "Create a {} API key at {} (it is usually exported as {}). Ready to paste it?",
                    provider.label(),
                    provider.key_url(),
                    provider.env_var()
                ))
            })
            .then_with(|answers| {
                Ok(answers
                    .is_yes("setup_confirm")
                    .then(|| "api_key".to_string()))
            }),
    )
    .with_question(
        Question::password("api_key", "Paste your API key").with_validator(|value| {
            value
                .trim()
                .is_empty()
                .then(|| "API key must not be empty.".to_string())
        }),
    )
}

fn chosen_provider(answers: &Answers) -> anyhow::Result<Provider> {
    let raw = answers
        .get_str("provider")
        .context("provider has not been answered")?;
    Ok(raw.parse()?)
}

async fn complete(store: &dyn CredentialStore, answers: &Answers) -> anyhow::Result<FlowResult> {
    let provider = chosen_provider(answers)?;
    if !answers.is_yes("setup_confirm") {
        return Ok(FlowResult::failure(format!(
            "{} setup cancelled. Run /auth when you have a key.",
            provider.label()
        )));
    }

    let key = answers
        .get_str("api_key")
        .context("api_key has not been answered")?
        .trim()
        .to_string();

    if !store.verify_key(provider, &key).await? {
        warn!(provider = %provider, "API key rejected");
        return Ok(FlowResult::retry(
            format!("That {} key was not accepted. Please try again.", provider.label()),
            "api_key",
        ));
    }

    store.save_key(provider, SecretString::from(key)).await?;
    info!(provider = %provider, "Provider configured");
    Ok(FlowResult::success(format!(
        "{} is configured and ready.",
        provider.label()
    )))
}
