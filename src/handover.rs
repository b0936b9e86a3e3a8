//! Handover trigger evaluation
//!
//! The router calls into here after each inbound customer message. Mixed
//! triggers (a complaint that also asks for a human) resolve to the reason
//! with the highest priority.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::HandoverReason;
use crate::nlu::{Analysis, Entity, Intent};

/// Consecutive low-confidence classifications that force escalation
const LOW_CONFIDENCE_STREAK: u32 = 2;

/// A decided escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub reason: HandoverReason,
    pub priority: i64,
}

/// Priority per reason; entity context can bump the mid-tier reasons
#[must_use]
pub fn priority_for(reason: HandoverReason, entities: &BTreeMap<String, Entity>) -> i64 {
    match reason {
        HandoverReason::Complaint | HandoverReason::Escalation => 4,
        HandoverReason::ExplicitRequest => 3,
        HandoverReason::ComplexQuery | HandoverReason::TechnicalProblem => {
            if entities.contains_key("cpf") || entities.contains_key("email") {
                3
            } else {
                2
            }
        }
        HandoverReason::LowConfidence | HandoverReason::OutOfHours => 2,
    }
}

/// Tracks consecutive low-confidence classifications per conversation
///
/// The streak resets on any confident classification and when a trigger
/// fires, so a third low-confidence message never opens a second ticket.
#[derive(Default)]
pub struct LowConfidenceTracker {
    streaks: Mutex<HashMap<String, u32>>,
}

impl LowConfidenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one classification; returns the current streak length
    pub fn observe(&self, conversation_id: &str, confidence: f64, threshold: f64) -> u32 {
        let mut streaks = self.streaks.lock().expect("tracker lock");
        if confidence < threshold {
            let streak = streaks.entry(conversation_id.to_string()).or_insert(0);
            *streak += 1;
            *streak
        } else {
            streaks.remove(conversation_id);
            0
        }
    }

    /// Forget a conversation's streak (ticket opened, or resolved)
    pub fn reset(&self, conversation_id: &str) {
        self.streaks
            .lock()
            .expect("tracker lock")
            .remove(conversation_id);
    }
}

/// Evaluate every trigger for one classified customer message
///
/// Returns the winning trigger, already resolved to the highest-priority
/// reason when several apply.
#[must_use]
pub fn evaluate(
    analysis: &Analysis,
    low_confidence_streak: u32,
    out_of_hours: bool,
) -> Option<Trigger> {
    let mut reasons = Vec::new();

    if analysis.intent == Intent::RequestHuman {
        reasons.push(HandoverReason::ExplicitRequest);
    }
    // A complaint counts even when another intent won the keyword race
    if analysis.intent == Intent::Complaint || analysis.all_matched.contains(&Intent::Complaint) {
        reasons.push(HandoverReason::Complaint);
    }
    if analysis.intent == Intent::Escalate {
        reasons.push(HandoverReason::Escalation);
    }
    if low_confidence_streak >= LOW_CONFIDENCE_STREAK {
        reasons.push(HandoverReason::LowConfidence);
    }
    if out_of_hours {
        reasons.push(HandoverReason::OutOfHours);
    }

    reasons
        .into_iter()
        .map(|reason| Trigger {
            reason,
            priority: priority_for(reason, &analysis.entities),
        })
        .max_by_key(|trigger| trigger.priority)
}

/// One final customer-facing acknowledgement before the humans take over
#[must_use]
pub fn customer_message_for(reason: HandoverReason) -> &'static str {
    match reason {
        HandoverReason::ExplicitRequest => {
            "Claro! Vou conectar você com um de nossos atendentes. Um momento, por favor... 👤"
        }
        HandoverReason::LowConfidence => {
            "Hmm, não tenho certeza se entendi corretamente. Vou transferir você para um \
             especialista que pode ajudar melhor! 🤝"
        }
        HandoverReason::Complaint => {
            "Lamento muito pelo problema. Vou transferir imediatamente para nosso supervisor \
             resolver isso com prioridade! 🚨"
        }
        HandoverReason::ComplexQuery => {
            "Essa é uma questão importante! Vou conectar você com um especialista que tem mais \
             experiência nesse assunto. 💡"
        }
        HandoverReason::Escalation => {
            "Vou escalar sua solicitação para nosso supervisor. Aguarde um momento, por favor... 📞"
        }
        HandoverReason::TechnicalProblem => {
            "Entendo a situação técnica. Vou transferir para nossa equipe de suporte \
             especializada! 🔧"
        }
        HandoverReason::OutOfHours => {
            "No momento estamos fora do horário de atendimento, mas vou registrar sua \
             solicitação e retornaremos assim que possível! ⏰"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlu::Method;

    fn analysis(intent: Intent, confidence: f64, all_matched: Vec<Intent>) -> Analysis {
        Analysis {
            intent,
            confidence,
            method: Method::Rule,
            entities: BTreeMap::new(),
            all_matched,
        }
    }

    #[test]
    fn test_explicit_request_triggers() {
        let trigger = evaluate(&analysis(Intent::RequestHuman, 0.4, vec![]), 0, false).unwrap();
        assert_eq!(trigger.reason, HandoverReason::ExplicitRequest);
        assert_eq!(trigger.priority, 3);
    }

    #[test]
    fn test_complaint_wins_mixed_trigger() {
        // "isso é um absurdo, quero falar com um humano": request_human wins
        // the keyword race but the complaint outranks it
        let a = analysis(
            Intent::RequestHuman,
            0.4,
            vec![Intent::Complaint, Intent::RequestHuman],
        );
        let trigger = evaluate(&a, 0, false).unwrap();
        assert_eq!(trigger.reason, HandoverReason::Complaint);
        assert_eq!(trigger.priority, 4);
    }

    #[test]
    fn test_low_confidence_needs_a_streak_of_two() {
        let a = analysis(Intent::General, 0.3, vec![]);
        assert!(evaluate(&a, 1, false).is_none());
        let trigger = evaluate(&a, 2, false).unwrap();
        assert_eq!(trigger.reason, HandoverReason::LowConfidence);
    }

    #[test]
    fn test_confident_general_does_not_trigger() {
        let a = analysis(Intent::Greeting, 0.9, vec![Intent::Greeting]);
        assert!(evaluate(&a, 0, false).is_none());
    }

    #[test]
    fn test_out_of_hours_triggers() {
        let a = analysis(Intent::Purchase, 0.9, vec![Intent::Purchase]);
        let trigger = evaluate(&a, 0, true).unwrap();
        assert_eq!(trigger.reason, HandoverReason::OutOfHours);
    }

    #[test]
    fn test_entity_context_bumps_priority() {
        let mut entities = BTreeMap::new();
        entities.insert(
            "email".to_string(),
            Entity {
                value: "x@y.com".to_string(),
                normalized: Some("x@y.com".to_string()),
                valid: true,
            },
        );
        assert_eq!(priority_for(HandoverReason::TechnicalProblem, &entities), 3);
        assert_eq!(
            priority_for(HandoverReason::TechnicalProblem, &BTreeMap::new()),
            2
        );
    }

    #[test]
    fn test_tracker_streak_and_reset() {
        let tracker = LowConfidenceTracker::new();

        assert_eq!(tracker.observe("c1", 0.3, 0.5), 1);
        assert_eq!(tracker.observe("c1", 0.4, 0.5), 2);
        // A confident message resets the streak
        assert_eq!(tracker.observe("c1", 0.9, 0.5), 0);
        assert_eq!(tracker.observe("c1", 0.2, 0.5), 1);

        tracker.reset("c1");
        assert_eq!(tracker.observe("c1", 0.2, 0.5), 1);
    }
}
