//! Querying the provisioned knowledge base and its foundation models.
//!
//! | Command | What it does |
//! |---------|--------------|
//! | `kbh ask` | Retrieve-and-generate against the knowledge base |
//! | `kbh invoke` | Send a prompt straight to a foundation model |
//! | `kbh models` | List on-demand text models and their request family |
//!
//! The knowledge base is located by its configured name, so `ask` works in
//! any shell once `kbh provision` has run.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::context::foundation_model_arn;
use crate::ensure::find_knowledge_base;
use crate::foundation::ModelFamily;
use crate::models::{FoundationModelSummary, KnowledgeBaseStatus, RagAnswer, RagRequest};
use crate::traits::{ModelApi, ResourceApi};

/// Answer `prompt` from the knowledge base named in `config`, generating
/// with `model_id`.
pub async fn ask(
    config: &Config,
    resources: &dyn ResourceApi,
    models: &dyn ModelApi,
    prompt: &str,
    model_id: &str,
) -> Result<RagAnswer> {
    if prompt.trim().is_empty() {
        bail!("Prompt must not be empty");
    }
    ModelFamily::from_model_id(model_id)?;

    let name = &config.knowledge_base.name;
    let Some(kb) = find_knowledge_base(resources, name).await? else {
        bail!("Knowledge base '{}' not found. Run `kbh provision` first.", name);
    };
    if kb.status != KnowledgeBaseStatus::Active {
        bail!("Knowledge base '{}' is {:?}, not ACTIVE", name, kb.status);
    }

    tracing::debug!(knowledge_base_id = %kb.id, model_id, "retrieve and generate");
    let request = RagRequest {
        prompt: prompt.to_string(),
        knowledge_base_id: kb.id,
        model_arn: foundation_model_arn(&config.aws.region, model_id),
    };
    Ok(models.retrieve_and_generate(&request).await?)
}

pub async fn run_ask(
    config: &Config,
    resources: &dyn ResourceApi,
    models: &dyn ModelApi,
    prompt: &str,
    model: Option<&str>,
) -> Result<()> {
    let model_id = model.unwrap_or(&config.models.default_model);
    let answer = ask(config, resources, models, prompt, model_id).await?;

    println!("{}", answer.text.trim());
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!("  {}", source);
        }
    }
    Ok(())
}

/// Invoke `model_id` directly with the family's default parameters and
/// return the generated text.
pub async fn invoke(models: &dyn ModelApi, model_id: &str, prompt: &str) -> Result<String> {
    let family = ModelFamily::from_model_id(model_id)?;
    let body = family.request_body(prompt);
    let reply = models.invoke_model(model_id, &body).await?;
    Ok(family.extract_text(&reply)?)
}

pub async fn run_invoke(models: &dyn ModelApi, model_id: &str, prompt: &str) -> Result<()> {
    let text = invoke(models, model_id, prompt).await?;
    println!("{}", text.trim());
    Ok(())
}

/// Text models in the catalogue, paired with their request family when
/// `kbh invoke` supports them.
pub async fn list_models(
    models: &dyn ModelApi,
) -> Result<Vec<(FoundationModelSummary, Option<ModelFamily>)>> {
    let mut listed: Vec<_> = models
        .list_foundation_models()
        .await?
        .into_iter()
        .map(|m| {
            let family = ModelFamily::from_model_id(&m.model_id).ok();
            (m, family)
        })
        .collect();
    listed.sort_by(|a, b| a.0.model_id.cmp(&b.0.model_id));
    Ok(listed)
}

pub async fn run_models(models: &dyn ModelApi) -> Result<()> {
    let listed = list_models(models).await?;

    println!("{:<44} {:<12} PROVIDER", "MODEL", "FAMILY");
    for (model, family) in &listed {
        println!(
            "{:<44} {:<12} {}",
            model.model_id,
            family.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string()),
            model.provider_name.as_deref().unwrap_or("-")
        );
    }
    if listed.is_empty() {
        println!("(no on-demand text models available in this region)");
    }
    Ok(())
}
