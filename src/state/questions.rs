use indexmap::IndexMap;
use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::match_record::AnswerLetter;

/// Multiple-choice item of a question set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Identifier unique within its set; decks reference questions by id.
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    /// Letter of the correct option.
    pub answer: AnswerLetter,
}

/// Questions sharing a topic and a difficulty level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub topic: String,
    pub level: String,
    pub questions: Vec<Question>,
}

/// Question set and shuffled order the host dealt for one match.
///
/// Stored inside the shared record so both players resolve the same prompt
/// from their local bank without the prompt text travelling through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuestionDeck {
    pub topic: String,
    pub level: String,
    pub order: Vec<String>,
}

/// Errors raised while building a [`QuestionBank`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionBankError {
    #[error("question set `{topic}/{level}` is declared twice")]
    DuplicateSet { topic: String, level: String },
    #[error("question set `{topic}/{level}` has no questions")]
    EmptySet { topic: String, level: String },
    #[error("question `{id}` of `{topic}/{level}` is invalid: {reason}")]
    InvalidQuestion {
        topic: String,
        level: String,
        id: String,
        reason: &'static str,
    },
}

/// Read-only question source keyed by `(topic, level)`.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    sets: IndexMap<(String, String), IndexMap<String, Question>>,
}

impl QuestionBank {
    /// Index the given sets, rejecting duplicates and unanswerable questions.
    pub fn new(sets: Vec<QuestionSet>) -> Result<Self, QuestionBankError> {
        let mut bank = IndexMap::new();
        for set in sets {
            let key = (set.topic.clone(), set.level.clone());
            if bank.contains_key(&key) {
                return Err(QuestionBankError::DuplicateSet {
                    topic: set.topic,
                    level: set.level,
                });
            }
            if set.questions.is_empty() {
                return Err(QuestionBankError::EmptySet {
                    topic: set.topic,
                    level: set.level,
                });
            }

            let mut questions = IndexMap::new();
            for question in set.questions {
                let reason = if question.options.len() < 2 {
                    Some("needs at least two options")
                } else if question.answer.index() >= question.options.len() {
                    Some("answer does not designate an option")
                } else if questions.contains_key(&question.id) {
                    Some("duplicate id")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    return Err(QuestionBankError::InvalidQuestion {
                        topic: set.topic,
                        level: set.level,
                        id: question.id,
                        reason,
                    });
                }
                questions.insert(question.id.clone(), question);
            }
            bank.insert(key, questions);
        }
        Ok(Self { sets: bank })
    }

    /// `(topic, level)` of the set used when the host does not pick one.
    pub fn default_set(&self) -> Option<(&str, &str)> {
        self.sets
            .keys()
            .next()
            .map(|(topic, level)| (topic.as_str(), level.as_str()))
    }

    /// Level of the first set declared for `topic`.
    pub fn default_level(&self, topic: &str) -> Option<&str> {
        self.sets()
            .find(|(candidate, _)| *candidate == topic)
            .map(|(_, level)| level)
    }

    /// `(topic, level)` of every set, in declaration order.
    pub fn sets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sets
            .keys()
            .map(|(topic, level)| (topic.as_str(), level.as_str()))
    }

    /// Shuffle the ids of a set into a fresh deck.
    pub fn deal<R: Rng + ?Sized>(&self, topic: &str, level: &str, rng: &mut R) -> Option<QuestionDeck> {
        let questions = self.sets.get(&(topic.to_string(), level.to_string()))?;
        let mut order: Vec<String> = questions.keys().cloned().collect();
        order.shuffle(rng);
        Some(QuestionDeck {
            topic: topic.to_string(),
            level: level.to_string(),
            order,
        })
    }

    /// Question shown at `index`. The deck wraps around once exhausted.
    pub fn question(&self, deck: &QuestionDeck, index: u32) -> Option<&Question> {
        if deck.order.is_empty() {
            return None;
        }
        let id = &deck.order[index as usize % deck.order.len()];
        self.sets
            .get(&(deck.topic.clone(), deck.level.clone()))?
            .get(id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    pub(crate) fn letter(raw: &str) -> AnswerLetter {
        raw.parse().unwrap()
    }

    pub(crate) fn sample_bank() -> QuestionBank {
        QuestionBank::new(vec![QuestionSet {
            topic: "capitals".into(),
            level: "a1".into(),
            questions: vec![
                Question {
                    id: "q1".into(),
                    prompt: "Capital of France?".into(),
                    options: vec!["Paris".into(), "Rome".into()],
                    answer: letter("a"),
                },
                Question {
                    id: "q2".into(),
                    prompt: "Capital of Italy?".into(),
                    options: vec!["Paris".into(), "Rome".into()],
                    answer: letter("b"),
                },
            ],
        }])
        .unwrap()
    }

    #[test]
    fn dealt_deck_is_a_permutation_of_the_set() {
        let bank = sample_bank();
        let mut rng = StdRng::seed_from_u64(7);
        let deck = bank.deal("capitals", "a1", &mut rng).unwrap();
        let mut order = deck.order.clone();
        order.sort();
        assert_eq!(order, vec!["q1".to_string(), "q2".to_string()]);
        assert!(bank.deal("capitals", "c2", &mut rng).is_none());
    }

    #[test]
    fn default_level_follows_the_topic() {
        let set = |topic: &str, level: &str| QuestionSet {
            topic: topic.into(),
            level: level.into(),
            questions: vec![Question {
                id: "g1".into(),
                prompt: "Past tense of go?".into(),
                options: vec!["went".into(), "goed".into()],
                answer: letter("a"),
            }],
        };
        let sets = vec![set("capitals", "a1"), set("grammar", "b1"), set("grammar", "b2")];
        let bank = QuestionBank::new(sets).unwrap();
        assert_eq!(bank.default_level("grammar"), Some("b1"));
        assert_eq!(bank.default_level("astronomy"), None);
    }

    #[test]
    fn question_lookup_wraps_around() {
        let bank = sample_bank();
        let deck = QuestionDeck {
            topic: "capitals".into(),
            level: "a1".into(),
            order: vec!["q2".into(), "q1".into()],
        };
        assert_eq!(bank.question(&deck, 0).unwrap().id, "q2");
        assert_eq!(bank.question(&deck, 3).unwrap().id, "q1");
    }

    #[test]
    fn bank_rejects_unanswerable_questions() {
        let err = QuestionBank::new(vec![QuestionSet {
            topic: "t".into(),
            level: "l".into(),
            questions: vec![Question {
                id: "q".into(),
                prompt: "?".into(),
                options: vec!["x".into(), "y".into()],
                answer: letter("d"),
            }],
        }])
        .unwrap_err();
        assert!(matches!(err, QuestionBankError::InvalidQuestion { .. }));
    }
}
