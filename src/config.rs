//! Application-level configuration loading: question sets, player profiles and
//! controller timings.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::{
    match_record::AnswerLetter,
    profiles::Profile,
    questions::{Question, QuestionBank, QuestionSet},
};

/// Default location on disk where the daemon looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_DUEL_BACK_CONFIG_PATH";

/// Timings driving every match controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Period of the local countdown ticker.
    pub tick: Duration,
    /// The host publishes its countdown every this many ticks (0 disables it).
    pub time_sync_every: u32,
    /// First delay before re-subscribing after a dropped watch.
    pub reconnect_initial: Duration,
    /// Upper bound of the re-subscribe backoff.
    pub reconnect_max: Duration,
    /// Pause before the single retry of a failed resolution write.
    pub write_retry_delay: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            time_sync_every: 5,
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(8),
            write_retry_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub questions: QuestionBank,
    pub profiles: HashMap<String, Profile>,
    pub controller: ControllerSettings,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => match Self::try_from(raw) {
                    Ok(app_config) => {
                        info!(
                            path = %path.display(),
                            sets = app_config.questions.sets().count(),
                            profiles = app_config.profiles.len(),
                            "loaded configuration"
                        );
                        app_config
                    }
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "invalid question sets in config; falling back to defaults"
                        );
                        Self::default()
                    }
                },
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            questions: default_question_bank(),
            profiles: HashMap::new(),
            controller: ControllerSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    question_sets: Vec<QuestionSet>,
    #[serde(default)]
    profiles: HashMap<String, Profile>,
    #[serde(default)]
    controller: RawControllerConfig,
}

impl TryFrom<RawConfig> for AppConfig {
    type Error = crate::state::questions::QuestionBankError;

    fn try_from(value: RawConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            questions: QuestionBank::new(value.question_sets)?,
            profiles: value.profiles,
            controller: value.controller.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the `controller` section, durations in milliseconds.
struct RawControllerConfig {
    tick_ms: u64,
    time_sync_every: u32,
    reconnect_initial_ms: u64,
    reconnect_max_ms: u64,
    write_retry_delay_ms: u64,
}

impl Default for RawControllerConfig {
    fn default() -> Self {
        let defaults = ControllerSettings::default();
        Self {
            tick_ms: defaults.tick.as_millis() as u64,
            time_sync_every: defaults.time_sync_every,
            reconnect_initial_ms: defaults.reconnect_initial.as_millis() as u64,
            reconnect_max_ms: defaults.reconnect_max.as_millis() as u64,
            write_retry_delay_ms: defaults.write_retry_delay.as_millis() as u64,
        }
    }
}

impl From<RawControllerConfig> for ControllerSettings {
    fn from(value: RawControllerConfig) -> Self {
        Self {
            tick: Duration::from_millis(value.tick_ms.max(1)),
            time_sync_every: value.time_sync_every,
            reconnect_initial: Duration::from_millis(value.reconnect_initial_ms.max(1)),
            reconnect_max: Duration::from_millis(
                value.reconnect_max_ms.max(value.reconnect_initial_ms),
            ),
            write_retry_delay: Duration::from_millis(value.write_retry_delay_ms),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn question(id: &str, prompt: &str, options: [&str; 4], answer: usize) -> Option<Question> {
    Some(Question {
        id: id.to_string(),
        prompt: prompt.to_string(),
        options: options.iter().map(|option| option.to_string()).collect(),
        answer: AnswerLetter::from_index(answer)?,
    })
}

/// Built-in question sets shipped with the binary.
fn default_question_bank() -> QuestionBank {
    let sets = vec![
        QuestionSet {
            topic: "vocabulary".into(),
            level: "a1".into(),
            questions: [
                question("voc-a1-01", "\"el perro\" means...", ["the cat", "the dog", "the bird", "the horse"], 1),
                question("voc-a1-02", "\"la manzana\" means...", ["the apple", "the pear", "the bread", "the apron"], 0),
                question("voc-a1-03", "\"rojo\" means...", ["green", "blue", "red", "yellow"], 2),
                question("voc-a1-04", "\"la casa\" means...", ["the car", "the street", "the town", "the house"], 3),
                question("voc-a1-05", "\"el agua\" means...", ["the water", "the wine", "the milk", "the juice"], 0),
                question("voc-a1-06", "\"grande\" means...", ["small", "big", "old", "new"], 1),
            ]
            .into_iter()
            .flatten()
            .collect(),
        },
        QuestionSet {
            topic: "grammar".into(),
            level: "a2".into(),
            questions: [
                question("gra-a2-01", "Yo ___ estudiante.", ["es", "eres", "soy", "somos"], 2),
                question("gra-a2-02", "Ellos ___ en Madrid.", ["viven", "vive", "vivo", "vivimos"], 0),
                question("gra-a2-03", "Ayer nosotros ___ al cine.", ["vamos", "fuimos", "iremos", "ibais"], 1),
                question("gra-a2-04", "¿___ hora es?", ["Cuál", "Quién", "Dónde", "Qué"], 3),
            ]
            .into_iter()
            .flatten()
            .collect(),
        },
    ];

    QuestionBank::new(sets).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_bank_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.questions.default_set(), Some(("vocabulary", "a1")));
        assert_eq!(config.questions.sets().count(), 2);
    }

    #[test]
    fn raw_config_parses_with_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "question_sets": [{
                    "topic": "colors",
                    "level": "a1",
                    "questions": [
                        { "id": "c1", "prompt": "azul?", "options": ["blue", "red"], "answer": "a" }
                    ]
                }],
                "profiles": { "alice": { "display_name": "Alice", "level": 4 } },
                "controller": { "tick_ms": 50 }
            }"#,
        )
        .unwrap();
        let config = AppConfig::try_from(raw).unwrap();
        assert_eq!(config.controller.tick, Duration::from_millis(50));
        assert_eq!(config.controller.time_sync_every, 5);
        assert_eq!(config.profiles["alice"].level, 4);
        assert_eq!(config.questions.default_set(), Some(("colors", "a1")));
    }
}
