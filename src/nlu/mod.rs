//! NLU classifier: one intent + confidence per text window, plus entities
//!
//! Two strategies. The rule strategy is always available; the model
//! strategy is preferred when configured and reachable, and ANY failure —
//! timeout, transport error, malformed JSON — falls back to rules. The
//! result advertises which strategy produced it so downstream policy can
//! weight it.

pub mod entities;
pub mod intents;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::{Error, Result};

pub use entities::{extract_entities, Entity};
pub use intents::{classify_with_rules, Intent, Speaker};

/// Which strategy produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Rule,
    Model,
}

/// Full analysis of one text window
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub intent: Intent,
    pub confidence: f64,
    pub method: Method,
    pub entities: BTreeMap<String, Entity>,
    /// Every intent whose keywords matched, for mixed-trigger policy
    #[serde(skip)]
    pub all_matched: Vec<Intent>,
}

/// Model-backed intent strategy, pluggable so tests can script it
#[async_trait]
pub trait IntentModel: Send + Sync {
    async fn classify(&self, text: &str, speaker: Speaker) -> Result<(Intent, f64)>;
}

/// The classifier
pub struct Classifier {
    model: Option<Arc<dyn IntentModel>>,
}

impl Classifier {
    /// Rule-only classifier
    #[must_use]
    pub fn rule_based() -> Self {
        Self { model: None }
    }

    /// Classifier preferring the given model strategy
    #[must_use]
    pub fn with_model(model: Arc<dyn IntentModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Build from configuration
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        if config.use_model_nlu && config.api_key.is_some() {
            Self::with_model(Arc::new(HttpIntentModel::new(config)))
        } else {
            Self::rule_based()
        }
    }

    /// Classify a text window and extract its entities
    pub async fn analyze(&self, text: &str, speaker: Speaker) -> Analysis {
        let entities = extract_entities(text, Utc::now());
        let rules = classify_with_rules(text, speaker);

        if let Some(model) = &self.model {
            match model.classify(text, speaker).await {
                Ok((intent, confidence)) => {
                    return Analysis {
                        intent,
                        confidence,
                        method: Method::Model,
                        entities,
                        all_matched: rules.all_matched,
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "model NLU failed, falling back to rules");
                }
            }
        }

        Analysis {
            intent: rules.intent,
            confidence: rules.confidence,
            method: Method::Rule,
            entities,
            all_matched: rules.all_matched,
        }
    }
}

/// Model strategy over a chat-completions endpoint
pub struct HttpIntentModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    deadline: Duration,
}

#[derive(Deserialize)]
struct ModelVerdict {
    intent: String,
    confidence: f64,
}

impl HttpIntentModel {
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.nlu_model.clone(),
            deadline: config.deadline,
        }
    }

    fn prompt(text: &str, speaker: Speaker) -> String {
        let table = match speaker {
            Speaker::Customer => intents::CUSTOMER_INTENTS,
            Speaker::Agent => intents::AGENT_INTENTS,
        };
        let mut lines = String::new();
        for pattern in table {
            let sample: Vec<&str> = pattern.keywords.iter().take(5).copied().collect();
            lines.push_str(&format!(
                "- {}: {}\n",
                pattern.intent.as_str(),
                sample.join(", ")
            ));
        }

        format!(
            "Analise a mensagem e identifique a intenção do usuário.\n\n\
             Mensagem: \"{text}\"\n\n\
             Intenções possíveis:\n{lines}\n\
             Retorne APENAS um JSON válido no formato:\n\
             {{\"intent\": \"nome_da_intencao\", \"confidence\": 0.95}}\n\n\
             Se a mensagem não se encaixar em nenhuma intenção, use \"general\" \
             com confidence baixa."
        )
    }
}

#[async_trait]
impl IntentModel for HttpIntentModel {
    async fn classify(&self, text: &str, speaker: Speaker) -> Result<(Intent, f64)> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": Self::prompt(text, speaker)}],
            "temperature": 0.3,
            "max_tokens": 150,
        });

        let request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.deadline, request)
            .await
            .map_err(|_| Error::Unavailable("NLU model deadline exceeded".to_string()))??;

        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "NLU model returned {}",
                response.status()
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::Unavailable("NLU model returned no content".to_string()))?;

        let verdict: ModelVerdict = serde_json::from_str(strip_fences(content))?;

        let intent = match Intent::parse(&verdict.intent) {
            Some(intent) => intent,
            None => return Ok((Intent::General, 0.3)),
        };

        Ok((intent, verdict.confidence.clamp(0.0, 1.0)))
    }
}

/// Strip markdown code fences the model sometimes wraps JSON in
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingModel;

    #[async_trait]
    impl IntentModel for FailingModel {
        async fn classify(&self, _text: &str, _speaker: Speaker) -> Result<(Intent, f64)> {
            Err(Error::Unavailable("endpoint returned 500".to_string()))
        }
    }

    struct ScriptedModel(Intent, f64);

    #[async_trait]
    impl IntentModel for ScriptedModel {
        async fn classify(&self, _text: &str, _speaker: Speaker) -> Result<(Intent, f64)> {
            Ok((self.0, self.1))
        }
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_rules() {
        let classifier = Classifier::with_model(Arc::new(FailingModel));
        let analysis = classifier
            .analyze("preciso agendar uma reunião", Speaker::Customer)
            .await;
        assert_eq!(analysis.method, Method::Rule);
        assert_eq!(analysis.intent, Intent::Scheduling);
    }

    #[tokio::test]
    async fn test_model_result_preferred() {
        let classifier = Classifier::with_model(Arc::new(ScriptedModel(Intent::Scheduling, 0.9)));
        let analysis = classifier.analyze("qualquer coisa", Speaker::Customer).await;
        assert_eq!(analysis.method, Method::Model);
        assert_eq!(analysis.intent, Intent::Scheduling);
        assert!((analysis.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_rule_only_classifier() {
        let classifier = Classifier::rule_based();
        let analysis = classifier
            .analyze("quero falar com um humano", Speaker::Customer)
            .await;
        assert_eq!(analysis.method, Method::Rule);
        assert_eq!(analysis.intent, Intent::RequestHuman);
    }

    #[tokio::test]
    async fn test_entities_extracted_regardless_of_strategy() {
        let classifier = Classifier::rule_based();
        let analysis = classifier
            .analyze("meu email é x@y.com", Speaker::Customer)
            .await;
        assert!(analysis.entities.contains_key("email"));
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
