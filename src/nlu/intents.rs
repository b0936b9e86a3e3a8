//! Intent taxonomy and the rule-based strategy
//!
//! The taxonomy is a closed set; extending it is an explicit change to the
//! tables below. Keyword matching is substring-based over the lower-cased
//! text, and rule confidence is a bounded function of hit count over text
//! length.

use serde::{Deserialize, Serialize};

/// Who produced the text window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Customer,
    Agent,
}

/// A label from the closed taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    // Customer-side
    Greeting,
    Purchase,
    Scheduling,
    Legal,
    TechnicalSupport,
    Complaint,
    Cancellation,
    RequestHuman,
    General,
    // Agent-side (internal operator messages)
    SearchInfo,
    CreateOrder,
    CheckStatus,
    ScheduleMeeting,
    Escalate,
}

impl Intent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Purchase => "purchase",
            Self::Scheduling => "scheduling",
            Self::Legal => "legal",
            Self::TechnicalSupport => "technical_support",
            Self::Complaint => "complaint",
            Self::Cancellation => "cancellation",
            Self::RequestHuman => "request_human",
            Self::General => "general",
            Self::SearchInfo => "search_info",
            Self::CreateOrder => "create_order",
            Self::CheckStatus => "check_status",
            Self::ScheduleMeeting => "schedule_meeting",
            Self::Escalate => "escalate",
        }
    }

    /// Parse a label advertised to the model strategy back into the enum
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "greeting" => Some(Self::Greeting),
            "purchase" => Some(Self::Purchase),
            "scheduling" => Some(Self::Scheduling),
            "legal" => Some(Self::Legal),
            "technical_support" => Some(Self::TechnicalSupport),
            "complaint" => Some(Self::Complaint),
            "cancellation" => Some(Self::Cancellation),
            "request_human" => Some(Self::RequestHuman),
            "general" => Some(Self::General),
            "search_info" => Some(Self::SearchInfo),
            "create_order" => Some(Self::CreateOrder),
            "check_status" => Some(Self::CheckStatus),
            "schedule_meeting" => Some(Self::ScheduleMeeting),
            "escalate" => Some(Self::Escalate),
            _ => None,
        }
    }

    /// The built-in agent that answers this intent, when one does
    #[must_use]
    pub const fn suggested_agent(self) -> Option<&'static str> {
        match self {
            Self::Purchase | Self::Scheduling | Self::Cancellation => Some("sdr"),
            Self::Legal => Some("legal"),
            Self::TechnicalSupport => Some("tech"),
            _ => None,
        }
    }
}

/// Keyword table entry
pub struct IntentPattern {
    pub intent: Intent,
    pub keywords: &'static [&'static str],
}

/// Customer-side keyword tables (pt-BR product surface)
pub const CUSTOMER_INTENTS: &[IntentPattern] = &[
    IntentPattern {
        intent: Intent::Greeting,
        keywords: &["olá", "oi", "bom dia", "boa tarde", "boa noite", "hey", "opa"],
    },
    IntentPattern {
        intent: Intent::Purchase,
        keywords: &[
            "quero comprar",
            "preciso comprar",
            "quanto custa",
            "preço",
            "valor",
            "orçamento",
            "produto",
            "vender",
        ],
    },
    IntentPattern {
        intent: Intent::Scheduling,
        keywords: &[
            "agendar",
            "marcar",
            "reunião",
            "meeting",
            "consulta",
            "horário disponível",
            "agenda",
            "disponibilidade",
        ],
    },
    IntentPattern {
        intent: Intent::Legal,
        keywords: &[
            "advogado",
            "jurídico",
            "contrato",
            "processo",
            "ação judicial",
            "direito",
            "lei",
        ],
    },
    IntentPattern {
        intent: Intent::TechnicalSupport,
        keywords: &[
            "erro",
            "bug",
            "não funciona",
            "problema técnico",
            "código",
            "sistema caiu",
            "travou",
        ],
    },
    IntentPattern {
        intent: Intent::Complaint,
        keywords: &[
            "reclamação",
            "insatisfeito",
            "péssimo",
            "ruim",
            "absurdo",
            "inaceitável",
            "não gostei",
            "decepcionado",
        ],
    },
    IntentPattern {
        intent: Intent::Cancellation,
        keywords: &["cancelar", "desistir", "não quero mais", "remover pedido"],
    },
    IntentPattern {
        intent: Intent::RequestHuman,
        keywords: &[
            "falar com humano",
            "falar com um humano",
            "atendente",
            "pessoa real",
            "humano",
            "transferir",
            "não entendi",
        ],
    },
];

/// Agent-side keyword tables
pub const AGENT_INTENTS: &[IntentPattern] = &[
    IntentPattern {
        intent: Intent::SearchInfo,
        keywords: &["buscar", "informação sobre", "consultar", "verificar"],
    },
    IntentPattern {
        intent: Intent::CreateOrder,
        keywords: &["criar pedido", "registrar venda", "novo pedido", "fechar venda"],
    },
    IntentPattern {
        intent: Intent::CheckStatus,
        keywords: &["status", "andamento", "verificar pedido", "acompanhar"],
    },
    IntentPattern {
        intent: Intent::ScheduleMeeting,
        keywords: &["agendar reunião", "marcar meeting", "agendar demo"],
    },
    IntentPattern {
        intent: Intent::Escalate,
        keywords: &["escalar", "supervisor", "gerente", "urgente"],
    },
];

/// Result of the rule strategy: winning intent, its confidence, and every
/// intent that matched at all (mixed-trigger evaluation needs the losers)
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub intent: Intent,
    pub confidence: f64,
    pub keywords_matched: Vec<&'static str>,
    pub all_matched: Vec<Intent>,
}

/// Classify a text window with the keyword tables
#[must_use]
pub fn classify_with_rules(text: &str, speaker: Speaker) -> RuleMatch {
    let lower = text.to_lowercase();
    let table = match speaker {
        Speaker::Customer => CUSTOMER_INTENTS,
        Speaker::Agent => AGENT_INTENTS,
    };

    let mut best: Option<(Intent, Vec<&'static str>)> = None;
    let mut all_matched = Vec::new();

    for pattern in table {
        let matches: Vec<&'static str> = pattern
            .keywords
            .iter()
            .filter(|kw| lower.contains(*kw))
            .copied()
            .collect();

        if !matches.is_empty() {
            all_matched.push(pattern.intent);
        }

        let beats = best
            .as_ref()
            .is_none_or(|(_, current)| matches.len() > current.len());
        if !matches.is_empty() && beats {
            best = Some((pattern.intent, matches));
        }
    }

    let Some((intent, keywords_matched)) = best else {
        return RuleMatch {
            intent: Intent::General,
            confidence: 0.0,
            keywords_matched: Vec::new(),
            all_matched,
        };
    };

    let words = lower.split_whitespace().count().max(1);
    let confidence = (2.0 * keywords_matched.len() as f64 / words as f64).min(1.0);
    let confidence = (confidence * 100.0).round() / 100.0;

    RuleMatch {
        intent,
        confidence,
        keywords_matched,
        all_matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduling_keywords() {
        let m = classify_with_rules("preciso agendar uma reunião amanhã", Speaker::Customer);
        assert_eq!(m.intent, Intent::Scheduling);
        assert!(m.confidence > 0.0);
        assert!(m.keywords_matched.contains(&"agendar"));
    }

    #[test]
    fn test_request_human() {
        let m = classify_with_rules("quero falar com um humano", Speaker::Customer);
        assert_eq!(m.intent, Intent::RequestHuman);
    }

    #[test]
    fn test_complaint_also_recorded_when_request_human_wins() {
        let m = classify_with_rules(
            "isso é um absurdo, quero falar com um humano",
            Speaker::Customer,
        );
        assert_eq!(m.intent, Intent::RequestHuman);
        assert!(m.all_matched.contains(&Intent::Complaint));
    }

    #[test]
    fn test_no_match_is_general_with_zero_confidence() {
        let m = classify_with_rules("xyzzy plugh", Speaker::Customer);
        assert_eq!(m.intent, Intent::General);
        assert_eq!(m.confidence, 0.0);
    }

    #[test]
    fn test_agent_side_table() {
        let m = classify_with_rules("agendar demo com o lead", Speaker::Agent);
        assert_eq!(m.intent, Intent::ScheduleMeeting);
    }

    #[test]
    fn test_confidence_bounded() {
        let m = classify_with_rules("oi", Speaker::Customer);
        assert!(m.confidence <= 1.0);
    }

    #[test]
    fn test_intent_agent_mapping() {
        assert_eq!(Intent::Scheduling.suggested_agent(), Some("sdr"));
        assert_eq!(Intent::Legal.suggested_agent(), Some("legal"));
        assert_eq!(Intent::Greeting.suggested_agent(), None);
    }
}
