//! Prompts for debate rounds and the final synthesis.

use crate::types::ProviderAnswer;

/// Critique prompt for `provider_id`: the question plus every other
/// provider's latest output. A provider never sees its own text.
pub fn critique_prompt(question: &str, latest: &[ProviderAnswer], provider_id: &str) -> String {
    let others = latest
        .iter()
        .filter(|a| a.provider_id != provider_id)
        .map(|a| format!("Answer from {}:\n{}", a.display, a.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are taking part in an expert discussion. Here is the user's question \
         and the answers given by other AI models.\n\n\
         Question: {question}\n\n\
         {others}\n\n\
         Analyse your colleagues' answers:\n\
         1. What you agree with and why\n\
         2. What you disagree with and why\n\
         3. What important points they missed\n\
         4. Your final position\n\n\
         Be specific and refer to your colleagues' arguments. \
         Do not be polite for the sake of it; be honest."
    )
}

/// Synthesis prompt over the initial answers and the latest critiques.
pub fn summary_prompt(
    question: &str,
    answers: &[ProviderAnswer],
    critiques: &[ProviderAnswer],
) -> String {
    let mut parts = Vec::with_capacity(answers.len() * 2);
    for answer in answers {
        parts.push(format!("Answer from {}:\n{}", answer.display, answer.text));
        if let Some(critique) = critiques
            .iter()
            .find(|c| c.provider_id == answer.provider_id)
        {
            parts.push(format!("Analysis by {}:\n{}", answer.display, critique.text));
        }
    }
    let content = parts.join("\n\n");

    format!(
        "Here is the user's question, the answers of several AI models and their \
         critiques of each other.\n\n\
         Question: {question}\n\n\
         {content}\n\n\
         Write a final summary:\n\
         - Consensus: what everyone agrees on\n\
         - Disagreements: the key points of contention\n\
         - Best recommendation: a synthesis of the best ideas from all answers"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn answer(id: &str, text: &str) -> ProviderAnswer {
        ProviderAnswer {
            provider_id: id.into(),
            display: format!("{id}-display"),
            name: id.into(),
            label: id.into(),
            text: text.into(),
            elapsed: Duration::ZERO,
            generation: None,
        }
    }

    #[test]
    fn test_critique_excludes_own_answer() {
        let latest = vec![
            answer("claude", "use tabs"),
            answer("gpt", "use spaces"),
            answer("gemini", "use both"),
        ];
        let prompt = critique_prompt("tabs or spaces?", &latest, "gpt");
        assert!(prompt.contains("Question: tabs or spaces?"));
        assert!(prompt.contains("Answer from claude-display:\nuse tabs"));
        assert!(prompt.contains("Answer from gemini-display:\nuse both"));
        assert!(!prompt.contains("use spaces"));
    }

    #[test]
    fn test_summary_pairs_answers_with_critiques() {
        let answers = vec![answer("claude", "A1"), answer("gpt", "A2")];
        let critiques = vec![answer("gpt", "C2")];
        let prompt = summary_prompt("q", &answers, &critiques);
        let a1 = prompt.find("Answer from claude-display:\nA1").unwrap();
        let a2 = prompt.find("Answer from gpt-display:\nA2").unwrap();
        let c2 = prompt.find("Analysis by gpt-display:\nC2").unwrap();
        assert!(a1 < a2 && a2 < c2);
        assert!(!prompt.contains("Analysis by claude-display"));
        assert!(prompt.contains("Best recommendation"));
    }
}
