//! Agent registry: the callable set of agents and invocation routing
//!
//! An agent is a value of a sum type — built-in specialist or tenant-defined
//! custom agent — plus a single `respond` path. Adding an agent is adding a
//! variant or a row. Custom agent credentials are loaded at call time and
//! handed straight to the LLM adapter, which is the only component that
//! sees them.

pub mod llm;
pub mod prompts;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::db::{CustomAgentRepo, StoredMessage};
use crate::nlu::Entity;
use crate::Result;

pub use llm::{ChatTurn, HttpLlmClient, LlmClient, LlmOutcome, LlmRequest, ToolSpec};

/// How many history messages an agent sees
const HISTORY_WINDOW: usize = 10;

/// Fallback when the provider fails or exceeds its deadline
const FALLBACK_TEXT: &str =
    "Desculpe, estou com dificuldade para responder agora. Pode tentar de novo em instantes? 🙏";

/// Built-in specialists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltIn {
    Concierge,
    Sdr,
    Legal,
    Tech,
    Medic,
    Counselor,
}

impl BuiltIn {
    pub const ALL: [Self; 6] = [
        Self::Concierge,
        Self::Sdr,
        Self::Legal,
        Self::Tech,
        Self::Medic,
        Self::Counselor,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Concierge => "guru",
            Self::Sdr => "sdr",
            Self::Legal => "legal",
            Self::Tech => "tech",
            Self::Medic => "medico",
            Self::Counselor => "psicologo",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Concierge => "Guru",
            Self::Sdr => "Sales Pro",
            Self::Legal => "Dr. Advocatus",
            Self::Tech => "Suporte Técnico",
            Self::Medic => "Dr. Health",
            Self::Counselor => "MindCare",
        }
    }

    #[must_use]
    pub const fn emoji(self) -> &'static str {
        match self {
            Self::Concierge => "🧠",
            Self::Sdr => "💼",
            Self::Legal => "⚖️",
            Self::Tech => "🔧",
            Self::Medic => "🩺",
            Self::Counselor => "🧘",
        }
    }

    #[must_use]
    pub const fn system_prompt(self) -> &'static str {
        match self {
            Self::Concierge => prompts::CONCIERGE,
            Self::Sdr => prompts::SDR,
            Self::Legal => prompts::LEGAL,
            Self::Tech => prompts::TECH,
            Self::Medic => prompts::MEDIC,
            Self::Counselor => prompts::COUNSELOR,
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|agent| agent.key() == key)
    }
}

/// A resolved, callable agent
#[derive(Debug, Clone)]
pub enum Agent {
    BuiltIn(BuiltIn),
    Custom(crate::db::CustomAgentDef),
}

impl Agent {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::BuiltIn(agent) => agent.key(),
            Self::Custom(def) => &def.key,
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::BuiltIn(agent) => agent.display_name(),
            Self::Custom(def) => &def.name,
        }
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        match self {
            Self::BuiltIn(agent) => agent.system_prompt(),
            Self::Custom(def) => &def.system_prompt,
        }
    }

    /// Tool set this agent may call
    #[must_use]
    pub fn tools(&self) -> Vec<ToolSpec> {
        match self {
            Self::BuiltIn(BuiltIn::Sdr) => vec![
                ToolSpec {
                    name: "schedule_meeting",
                    description: "Agenda uma reunião quando email, data e horário \
                                  do cliente são conhecidos",
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "email": {"type": "string"},
                            "date": {"type": "string", "description": "YYYY-MM-DD"},
                            "time": {"type": "string", "description": "HH:MM"},
                            "title": {"type": "string"}
                        },
                        "required": ["email", "date", "time"]
                    }),
                },
                ToolSpec {
                    name: "fetch_availability",
                    description: "Lista horários livres em uma data",
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "date": {"type": "string", "description": "YYYY-MM-DD"}
                        },
                        "required": ["date"]
                    }),
                },
            ],
            _ => Vec::new(),
        }
    }
}

/// Agent metadata for listings
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub key: String,
    pub name: String,
    pub emoji: String,
    pub category: &'static str,
}

/// What an invocation produced
#[derive(Debug, Clone)]
pub enum AgentReply {
    Text(String),
    ToolCall { name: String, arguments: serde_json::Value },
}

/// The registry
pub struct AgentRegistry {
    custom: CustomAgentRepo,
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
}

impl AgentRegistry {
    #[must_use]
    pub fn new(custom: CustomAgentRepo, llm: Arc<dyn LlmClient>, max_tokens: u32) -> Self {
        Self {
            custom,
            llm,
            max_tokens,
        }
    }

    /// The default addressee when nothing else claims a message
    #[must_use]
    pub const fn default_agent() -> BuiltIn {
        BuiltIn::Concierge
    }

    /// Resolve a key to a callable agent; built-ins shadow custom rows
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn resolve(&self, key: &str) -> Result<Option<Agent>> {
        if let Some(builtin) = BuiltIn::from_key(key) {
            return Ok(Some(Agent::BuiltIn(builtin)));
        }
        Ok(self.custom.find(key)?.map(Agent::Custom))
    }

    /// All registered agents, built-ins first
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn list(&self, owner_user_id: &str) -> Result<Vec<AgentInfo>> {
        let mut agents: Vec<AgentInfo> = BuiltIn::ALL
            .iter()
            .map(|agent| AgentInfo {
                key: agent.key().to_string(),
                name: agent.display_name().to_string(),
                emoji: agent.emoji().to_string(),
                category: "built_in",
            })
            .collect();

        for def in self.custom.list(owner_user_id)? {
            agents.push(AgentInfo {
                key: def.key,
                name: def.name,
                emoji: def.emoji,
                category: "custom",
            });
        }

        Ok(agents)
    }

    /// Detect a leading `@key` mention against the registered set
    ///
    /// An unregistered key is treated as plain text, not a dispatch.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn detect_mention(&self, text: &str) -> Result<Option<(Agent, String)>> {
        let trimmed = text.trim();
        let Some(rest) = trimmed.strip_prefix('@') else {
            return Ok(None);
        };

        let key: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if key.is_empty() {
            return Ok(None);
        }

        let Some(agent) = self.resolve(&key.to_lowercase())? else {
            return Ok(None);
        };

        let cleaned = rest[key.len()..]
            .trim_start_matches([',', ':'])
            .trim()
            .to_string();
        Ok(Some((agent, cleaned)))
    }

    /// Invoke an agent with bounded history and the extracted entities
    ///
    /// Never fails toward the customer: provider errors and deadline
    /// overruns produce the fallback apology.
    pub async fn respond(
        &self,
        agent: &Agent,
        history: &[StoredMessage],
        user_name: &str,
        message: &str,
        entities: &BTreeMap<String, Entity>,
    ) -> AgentReply {
        let turns: Vec<ChatTurn> = history
            .iter()
            .rev()
            .take(HISTORY_WINDOW)
            .rev()
            .map(|msg| {
                if msg.agent_key.is_some() {
                    ChatTurn::assistant(msg.text.clone())
                } else {
                    ChatTurn::user(msg.text.clone())
                }
            })
            .collect();

        let mut system_prompt = agent.system_prompt().to_string();
        if !entities.is_empty() {
            let collected: Vec<String> = entities
                .iter()
                .filter_map(|(kind, entity)| {
                    entity
                        .normalized
                        .as_ref()
                        .map(|value| format!("{kind}: {value}"))
                })
                .collect();
            if !collected.is_empty() {
                system_prompt.push_str("\n\nDados já coletados do cliente:\n");
                system_prompt.push_str(&collected.join("\n"));
            }
        }

        let (api_key, provider_account) = match agent {
            Agent::BuiltIn(_) => (None, None),
            Agent::Custom(def) => (Some(def.api_key.as_str()), def.provider_account.as_deref()),
        };

        let tools = agent.tools();
        let request = LlmRequest {
            api_key,
            provider_account,
            system_prompt: &system_prompt,
            history: turns,
            user_message: format!("[Usuário: {user_name}] {message}"),
            tools: &tools,
            max_tokens: self.max_tokens,
        };

        match self.llm.respond(request).await {
            Ok(LlmOutcome::Text(text)) => AgentReply::Text(text),
            Ok(LlmOutcome::ToolCall { name, arguments }) => {
                AgentReply::ToolCall { name, arguments }
            }
            Err(e) => {
                tracing::warn!(agent = agent.key(), error = %e, "agent invocation failed");
                AgentReply::Text(FALLBACK_TEXT.to_string())
            }
        }
    }
}
