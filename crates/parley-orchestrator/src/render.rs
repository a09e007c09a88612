//! Rendering fan-out results and debate rounds for the chat transport.

use crate::types::ProviderAnswer;
use parley_channels::{
    md_to_html, ChatId, Keyboard, MessageHandle, Signature, StreamingDelivery, MAX_MESSAGE_CHARS,
};

/// Between provider sections.
pub const SECTION_SEPARATOR: &str = "\n\n\u{2501}\u{2501}\u{2501}\n\n";

/// `"Claude 1.2s | GPT 0.8s"`
pub fn timing_footer(answers: &[ProviderAnswer]) -> String {
    answers
        .iter()
        .map(ProviderAnswer::timing)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Markdown for one critique round; `round` counts critique rounds from 1.
pub fn render_critiques(round: u32, critiques: &[ProviderAnswer]) -> String {
    let sections = critiques
        .iter()
        .map(|c| format!("{} analyzes:\n{}", c.display, c.text))
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);
    format!(
        "\u{2501}\u{2501}\u{2501} Round {}: Debate \u{2501}\u{2501}\u{2501}\n\n{sections}\n\n{}",
        round + 1,
        timing_footer(critiques)
    )
}

/// A fan-out result rendered per section, in HTML and plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub sections_html: Vec<String>,
    pub sections_plain: Vec<String>,
    pub footer: String,
}

impl Aggregate {
    /// Sections `"<display>:\n<text>"` each followed by a signature dated `date`.
    pub fn build(answers: &[ProviderAnswer], date: &str) -> Self {
        let mut sections_html = Vec::with_capacity(answers.len());
        let mut sections_plain = Vec::with_capacity(answers.len());
        for answer in answers {
            let body = format!("{}:\n{}", answer.display, answer.text);
            let signature = Signature {
                label: answer.label.clone(),
                date: date.to_string(),
                balance: None,
            };
            sections_html.push(format!("{}{}", md_to_html(&body), signature.html()));
            sections_plain.push(format!("{body}{}", signature.plain()));
        }
        Self {
            sections_html,
            sections_plain,
            footer: timing_footer(answers),
        }
    }

    pub fn today(answers: &[ProviderAnswer]) -> Self {
        Self::build(answers, &chrono::Local::now().format("%d.%m.%Y").to_string())
    }

    pub fn combined_html(&self) -> String {
        format!("{}\n\n{}", self.sections_html.join(SECTION_SEPARATOR), self.footer)
    }

    pub fn combined_plain(&self) -> String {
        format!("{}\n\n{}", self.sections_plain.join(SECTION_SEPARATOR), self.footer)
    }

    /// Whether the combined message fits the transport limit.
    pub fn fits(&self) -> bool {
        self.combined_html().chars().count() <= MAX_MESSAGE_CHARS
    }
}

/// Send an aggregate as one message when it fits, otherwise one message per
/// section. A section over the transport limit is split into chunks of its
/// own. The keyboard rides on the last message.
pub async fn deliver_aggregate(
    delivery: &StreamingDelivery,
    chat_id: ChatId,
    aggregate: &Aggregate,
    keyboard: Option<&Keyboard>,
) -> Vec<MessageHandle> {
    if aggregate.fits() {
        return delivery
            .send_formatted(
                chat_id,
                &aggregate.combined_html(),
                &aggregate.combined_plain(),
                keyboard,
            )
            .await
            .into_iter()
            .collect();
    }

    let last = aggregate.sections_html.len().saturating_sub(1);
    let mut messages = Vec::with_capacity(aggregate.sections_html.len());
    for (i, (html, plain)) in aggregate
        .sections_html
        .iter()
        .zip(&aggregate.sections_plain)
        .enumerate()
    {
        let keyboard = if i == last { keyboard } else { None };
        if html.chars().count() > delivery.config().max_message_chars {
            messages.extend(delivery.send_long(chat_id, plain, keyboard).await);
        } else if let Some(handle) = delivery.send_formatted(chat_id, html, plain, keyboard).await {
            messages.push(handle);
        }
    }
    messages
}
