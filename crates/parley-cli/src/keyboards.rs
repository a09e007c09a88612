//! Inline keyboards and their callback data.

use parley_agent::{ProviderRouter, ALL_PROVIDERS};
use parley_channels::{Button, Keyboard};

pub const REGENERATE: &str = "regen";
pub const ASK_PREFIX: &str = "ask:";
pub const MODEL_PREFIX: &str = "model:";
pub const MODEL_CLOSE: &str = "model:close";
pub const DEBATE_START: &str = "debate:start";
pub const DEBATE_ANOTHER: &str = "debate:another";
pub const DEBATE_SUMMARY: &str = "debate:summary";

/// Under every single-provider answer: regenerate, then one button per
/// other configured provider (`"GPT: gpt-4o"`).
pub fn response_keyboard(router: &ProviderRouter, current: &str) -> Keyboard {
    let others: Vec<Button> = router
        .providers()
        .iter()
        .filter(|p| p.id != current)
        .map(|p| {
            Button::callback(
                format!("{}: {}", p.display, p.model_id),
                format!("{ASK_PREFIX}{}", p.id),
            )
        })
        .collect();

    Keyboard::new()
        .row(vec![Button::callback("Regenerate", REGENERATE)])
        .row(others)
}

/// Provider picker for `/model`; the active choice carries a check mark.
pub fn model_keyboard(router: &ProviderRouter, current: &str) -> Keyboard {
    let mark = |id: &str| if id == current { " \u{2713}" } else { "" };
    let mut buttons: Vec<Button> = router
        .providers()
        .iter()
        .map(|p| {
            Button::callback(
                format!("{}{}", p.display, mark(&p.id)),
                format!("{MODEL_PREFIX}{}", p.id),
            )
        })
        .collect();
    buttons.push(Button::callback(
        format!("All{}", mark(ALL_PROVIDERS)),
        format!("{MODEL_PREFIX}{ALL_PROVIDERS}"),
    ));

    Keyboard::new()
        .row(buttons)
        .row(vec![Button::callback("\u{2190} Close", MODEL_CLOSE)])
}

/// After "ask all": start a debate; once one is running, summarize or go
/// another round.
pub fn debate_keyboard(has_debate: bool) -> Keyboard {
    if has_debate {
        Keyboard::new().row(vec![
            Button::callback("Summarize", DEBATE_SUMMARY),
            Button::callback("Another round", DEBATE_ANOTHER),
        ])
    } else {
        Keyboard::new().row(vec![Button::callback("Start debate", DEBATE_START)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_agent::{LlmProvider, ModelConfig, ProviderEntry};
    use parley_channels::ButtonAction;
    use parley_session::{MemoryStore, SessionStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn router() -> ProviderRouter {
        let providers = [
            (LlmProvider::Claude, "claude-opus-4-6"),
            (LlmProvider::OpenAi, "gpt-4o"),
            (LlmProvider::Gemini, "gemini-2.5-pro"),
        ]
        .into_iter()
        .filter_map(|(p, m)| ProviderEntry::from_config(&ModelConfig::new(p, m, "key")).ok())
        .collect();
        ProviderRouter::new(
            providers,
            "claude",
            Arc::new(SessionStore::new(Duration::from_secs(60))),
            Arc::new(MemoryStore::new()),
        )
    }

    fn callbacks(kb: &Keyboard, row: usize) -> Vec<String> {
        kb.rows[row]
            .iter()
            .filter_map(|b| match &b.action {
                ButtonAction::Callback(data) => Some(data.clone()),
                ButtonAction::Url(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_response_keyboard_offers_other_providers() {
        let kb = response_keyboard(&router(), "gpt");
        assert_eq!(callbacks(&kb, 0), vec!["regen"]);
        assert_eq!(callbacks(&kb, 1), vec!["ask:claude", "ask:gemini"]);
        assert_eq!(kb.rows[1][0].text, "Claude: claude-opus-4-6");
    }

    #[test]
    fn test_model_keyboard_marks_current() {
        let kb = model_keyboard(&router(), "all");
        assert_eq!(
            callbacks(&kb, 0),
            vec!["model:claude", "model:gpt", "model:gemini", "model:all"]
        );
        assert_eq!(kb.rows[0][3].text, "All \u{2713}");
        assert_eq!(kb.rows[0][0].text, "Claude");
        assert_eq!(callbacks(&kb, 1), vec![MODEL_CLOSE]);
    }

    #[test]
    fn test_debate_keyboard_states() {
        assert_eq!(callbacks(&debate_keyboard(false), 0), vec![DEBATE_START]);
        assert_eq!(
            callbacks(&debate_keyboard(true), 0),
            vec![DEBATE_SUMMARY, DEBATE_ANOTHER]
        );
    }
}
