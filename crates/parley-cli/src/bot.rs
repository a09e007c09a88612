//! Telegram event loop, commands and button callbacks.

use crate::app::App;
use crate::keyboards::{
    debate_keyboard, model_keyboard, response_keyboard, ASK_PREFIX, DEBATE_ANOTHER,
    DEBATE_START, DEBATE_SUMMARY, MODEL_CLOSE, MODEL_PREFIX, REGENERATE,
};
use parley_agent::{ProviderEntry, ALL_PROVIDERS};
use parley_channels::{
    escape_html, CallbackQuery, ChannelEvent, ChatId, DeliveryOutcome, DeliveryRequest,
    IncomingMessage, MessageHandle, Signature, TextFormat, Transport,
};
use parley_core::{truncate_chars, ChatMessage, ParleyResult, Role, UserId};
use parley_orchestrator::{deliver_aggregate, render_critiques, Aggregate, DebateState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const DEFAULT_IMAGE_PROMPT: &str = "Describe this image in detail.";
const IMAGE_MIME: &str = "image/jpeg";
const MAX_ERROR_DETAIL_CHARS: usize = 500;

/// A slash command split into name and argument, without any `@botname`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: &'a str,
    pub arg: &'a str,
}

pub fn parse_command(text: &str) -> Option<Command<'_>> {
    let rest = text.trim().strip_prefix('/')?;
    let (head, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some(Command {
        name,
        arg: arg.trim(),
    })
}

/// Poll Telegram and handle events until Ctrl-C.
///
/// Every event runs on its own task; a slow generation never blocks other
/// users.
pub async fn run(app: Arc<App>, mut events: mpsc::Receiver<ChannelEvent>) -> anyhow::Result<()> {
    let poller = {
        let telegram = app.telegram.clone();
        tokio::spawn(async move {
            if let Err(e) = telegram.poll_updates().await {
                error!(error = %e, "Telegram polling stopped");
            }
        })
    };
    info!("Parley bot started");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Event channel closed");
                    break;
                };
                let app = app.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_event(&app, event).await {
                        error!(error = %e, "Event handler failed");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    poller.abort();
    Ok(())
}

async fn handle_event(app: &App, event: ChannelEvent) -> ParleyResult<()> {
    match event {
        ChannelEvent::Message(message) => {
            if !app.config.is_allowed(message.user_id) {
                warn!(user_id = message.user_id, "Message from unauthorized user ignored");
                return Ok(());
            }
            handle_message(app, message).await
        }
        ChannelEvent::Callback(query) => {
            if !app.config.is_allowed(query.user_id) {
                warn!(user_id = query.user_id, "Callback from unauthorized user ignored");
                return app
                    .telegram
                    .answer_callback(&query.id, Some("Access denied"))
                    .await;
            }
            handle_callback(app, query).await
        }
    }
}

async fn handle_message(app: &App, message: IncomingMessage) -> ParleyResult<()> {
    let chat_id = message.chat_id;
    let user_id = message.user_id;

    if let Some(file_id) = &message.photo_file_id {
        let prompt = message
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_IMAGE_PROMPT);
        return handle_photo(app, chat_id, user_id, file_id, prompt).await;
    }

    let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    if let Some(command) = parse_command(text) {
        return handle_command(app, chat_id, user_id, command).await;
    }
    handle_text(app, chat_id, user_id, text).await
}

/// Route a text to the user's provider, or to every provider once when the
/// preference is "all".
async fn handle_text(app: &App, chat_id: ChatId, user_id: UserId, text: &str) -> ParleyResult<()> {
    app.last_prompts.insert(user_id, text.to_string());
    let provider = app.router.load_preference(user_id).await;

    if provider == ALL_PROVIDERS {
        let result = ask_all(app, chat_id, user_id, text).await;
        app.router
            .save_preference(user_id, app.router.default_provider())
            .await;
        return result;
    }
    ask_single(app, chat_id, user_id, text, &provider).await
}

/// Stream one provider's answer with history, then record the exchange.
async fn ask_single(
    app: &App,
    chat_id: ChatId,
    user_id: UserId,
    text: &str,
    provider_id: &str,
) -> ParleyResult<()> {
    let entry = app.router.resolve(provider_id)?;
    if let Err(e) = app.telegram.send_typing(chat_id).await {
        debug!(error = %e, "Typing indicator failed");
    }

    app.context
        .record_turn(user_id, Role::User, text, None, None)
        .await?;
    let history = app
        .context
        .build_context(user_id, Some(entry.backend.as_ref()))
        .await?;

    if let Some((reply, tokens)) = stream_answer(app, chat_id, entry, &history).await? {
        app.context
            .record_turn(user_id, Role::Assistant, reply, Some(&entry.id), tokens)
            .await?;
    }
    Ok(())
}

/// Stream `messages` to `entry` into a fresh placeholder.
///
/// Returns the delivered text and its output token count.
async fn stream_answer(
    app: &App,
    chat_id: ChatId,
    entry: &ProviderEntry,
    messages: &[ChatMessage],
) -> ParleyResult<Option<(String, Option<u64>)>> {
    let request = DeliveryRequest::new(chat_id, app.router.display_name(&entry.id))
        .with_signature(Signature::today(entry.label()))
        .with_keyboard(response_keyboard(&app.router, &entry.id));

    let stream = match entry
        .backend
        .generate_stream(Some(app.system_prompt()), messages)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            app.usage.record_error(&entry.id).await;
            warn!(provider = %entry.id, error = %e, "Could not start generation");
            let mut session = app.delivery.begin(request).await?;
            session.fail(&e.to_string()).await?;
            return Ok(None);
        }
    };

    match app.delivery.deliver(request, stream).await? {
        DeliveryOutcome::Delivered { generation, messages } => {
            app.usage.record(&generation).await;
            info!(
                provider = %entry.id,
                chars = generation.text.chars().count(),
                messages = messages.len(),
                "Response delivered"
            );
            let tokens = generation.usage.map(|u| u.output_tokens);
            Ok(Some((generation.text, tokens)))
        }
        DeliveryOutcome::EmptyResponse => {
            warn!(provider = %entry.id, "Empty response");
            Ok(None)
        }
        DeliveryOutcome::Failed { .. } => {
            app.usage.record_error(&entry.id).await;
            Ok(None)
        }
    }
}

/// Fan out to every provider and post the aggregate with a debate button.
async fn ask_all(app: &App, chat_id: ChatId, user_id: UserId, text: &str) -> ParleyResult<()> {
    let waiting = send_plain(app, chat_id, "Asking all models...").await;
    let answers = app.orchestrator.ask_all(user_id, text).await;
    delete_quietly(app, waiting).await;

    let answers = match answers {
        Ok(answers) => answers,
        Err(e) => {
            send_plain(app, chat_id, &error_notice("Error", &e)).await;
            return Ok(());
        }
    };
    let aggregate = Aggregate::today(&answers);
    deliver_aggregate(&app.delivery, chat_id, &aggregate, Some(&debate_keyboard(false))).await;
    Ok(())
}

async fn handle_photo(
    app: &App,
    chat_id: ChatId,
    user_id: UserId,
    file_id: &str,
    prompt: &str,
) -> ParleyResult<()> {
    let provider = app.router.load_preference(user_id).await;
    let entry = app.router.resolve(&provider)?;
    let display = app.router.display_name(&entry.id);

    let image = app.telegram.download_file(file_id).await?;
    let request = DeliveryRequest::new(chat_id, display.clone())
        .with_signature(Signature::today(entry.label()));
    let mut session = app.delivery.begin(request).await?;

    match entry
        .backend
        .generate_with_image(&image, IMAGE_MIME, prompt, Some(app.system_prompt()))
        .await
    {
        Ok(generation) => {
            app.usage.record(&generation).await;
            if generation.text.trim().is_empty() {
                session.finish().await?;
                return Ok(());
            }
            session
                .push(&format!("{display}:\n\n{}", generation.text))
                .await?;
            session.finish().await?;

            app.context
                .record_turn(user_id, Role::User, format!("[Image] {prompt}"), None, None)
                .await?;
            app.context
                .record_turn(
                    user_id,
                    Role::Assistant,
                    generation.text,
                    Some(&entry.id),
                    generation.usage.map(|u| u.output_tokens),
                )
                .await?;
        }
        Err(e) => {
            app.usage.record_error(&entry.id).await;
            session.fail(&e.to_string()).await?;
        }
    }
    Ok(())
}

async fn handle_command(
    app: &App,
    chat_id: ChatId,
    user_id: UserId,
    command: Command<'_>,
) -> ParleyResult<()> {
    info!(user_id, command = command.name, "Command");
    match command.name {
        "start" => {
            let provider = app.router.load_preference(user_id).await;
            let text = format!(
                "<b>Parley</b>\n\n\
                 Current model: {}\n\n\
                 Just send a message and I will answer.\n\
                 /model \u{2014} switch model\n\
                 /clear \u{2014} clear history\n\
                 /context \u{2014} context status",
                escape_html(&current_display(app, &provider))
            );
            send_html(app, chat_id, &text).await;
        }
        "help" => {
            send_html(
                app,
                chat_id,
                "<b>Parley \u{2014} Commands</b>\n\n\
                 /model \u{2014} choose a model, or all of them\n\
                 /context \u{2014} context status\n\
                 /clear \u{2014} clear dialogue history\n\
                 /usage \u{2014} calls and tokens per provider\n\
                 /help \u{2014} this help\n\n\
                 Send a photo to have it analyzed by the current model.",
            )
            .await;
        }
        "model" if !command.arg.is_empty() => {
            let reply = select_model(app, user_id, command.arg).await;
            send_plain(app, chat_id, &reply).await;
        }
        "model" => {
            let current = app.router.load_preference(user_id).await;
            let keyboard = model_keyboard(&app.router, &current);
            if let Err(e) = app
                .telegram
                .send(chat_id, "Choose a model:", TextFormat::Plain, Some(&keyboard))
                .await
            {
                warn!(error = %e, "Failed to send model picker");
            }
        }
        "clear" => {
            let count = app.context.clear_history(user_id).await?;
            app.last_prompts.remove(user_id);
            send_plain(app, chat_id, &format!("History cleared ({count} messages deleted)")).await;
        }
        "context" => {
            let stats = app.context.stats(user_id).await?;
            let text = format!(
                "<b>Context</b>\n\n\
                 Messages stored: {}\n\
                 Context window: {} / {}\n\
                 Summaries: {}\n\
                 Tokens saved: ~{}",
                stats.total_turns,
                stats.context_window,
                app.context.window_size(),
                stats.summaries,
                stats.tokens_saved
            );
            send_html(app, chat_id, &text).await;
        }
        "usage" => {
            let report = app.usage.render().await;
            send_plain(app, chat_id, &report).await;
        }
        other => {
            send_plain(app, chat_id, &format!("Unknown command /{other}. Try /help")).await;
        }
    }
    Ok(())
}

/// Save a provider choice and describe it.
async fn select_model(app: &App, user_id: UserId, provider_id: &str) -> String {
    if !app.router.is_selectable(provider_id) {
        return format!(
            "Model unavailable. Choose one of: {}, {ALL_PROVIDERS}",
            app.router.available_providers().join(", ")
        );
    }
    app.router.save_preference(user_id, provider_id).await;
    if provider_id == ALL_PROVIDERS {
        "Mode: ask ALL\nYour next message goes to every model.".to_string()
    } else {
        format!("Model switched to {}", app.router.display_name(provider_id))
    }
}

fn current_display(app: &App, provider: &str) -> String {
    if provider == ALL_PROVIDERS {
        "all models".to_string()
    } else {
        app.router.display_name(provider)
    }
}

async fn handle_callback(app: &App, query: CallbackQuery) -> ParleyResult<()> {
    let data = query.data.as_str();
    let user_id = query.user_id;
    let chat_id = query.chat_id;
    let message = MessageHandle {
        chat_id,
        message_id: query.message_id,
    };
    info!(user_id, data, "Callback");

    if data == REGENERATE {
        let Some(text) = app.last_prompts.get(user_id) else {
            return answer(app, &query, Some("No message to regenerate")).await;
        };
        answer(app, &query, Some("Regenerating...")).await?;
        let provider = app.router.load_preference(user_id).await;
        let provider = if provider == ALL_PROVIDERS {
            app.router.default_provider().to_string()
        } else {
            provider
        };
        return ask_single(app, chat_id, user_id, &text, &provider).await;
    }

    if let Some(provider_id) = data.strip_prefix(ASK_PREFIX) {
        let Some(entry) = app.router.entry(provider_id) else {
            return answer(app, &query, Some("Model unavailable")).await;
        };
        let Some(text) = app.last_prompts.get(user_id) else {
            return answer(app, &query, Some("No message to resend")).await;
        };
        app.router.save_preference(user_id, &entry.id).await;
        let notice = format!("{} is now the active model", entry.label());
        answer(app, &query, Some(notice.as_str())).await?;
        stream_answer(app, chat_id, entry, &[ChatMessage::user(text)]).await?;
        return Ok(());
    }

    if data == MODEL_CLOSE {
        answer(app, &query, None).await?;
        if let Err(e) = app.telegram.delete(&message).await {
            warn!(error = %e, "Failed to close model picker");
        }
        return Ok(());
    }

    if let Some(provider_id) = data.strip_prefix(MODEL_PREFIX) {
        if !app.router.is_selectable(provider_id) {
            return answer(app, &query, Some("Model unavailable")).await;
        }
        let reply = select_model(app, user_id, provider_id).await;
        answer(app, &query, None).await?;
        if let Err(e) = app
            .telegram
            .edit(&message, &reply, TextFormat::Plain, None)
            .await
        {
            warn!(error = %e, "Failed to update model picker");
        }
        return Ok(());
    }

    match data {
        DEBATE_START | DEBATE_ANOTHER => debate_round(app, &query).await,
        DEBATE_SUMMARY => debate_summary(app, &query).await,
        _ => {
            warn!(data, "Unknown callback");
            answer(app, &query, None).await
        }
    }
}

async fn debate_round(app: &App, query: &CallbackQuery) -> ParleyResult<()> {
    let rounds = match app.orchestrator.debate_state(query.user_id) {
        DebateState::Idle => return answer(app, query, Some("Nothing to debate")).await,
        DebateState::Round1Answered => 0,
        DebateState::Critiqued { rounds } => rounds,
    };
    answer(app, query, Some("Starting a debate round...")).await?;

    let waiting = send_plain(app, query.chat_id, "Models are analyzing each other's answers...").await;
    let result = app.orchestrator.critique_round(query.user_id).await;
    delete_quietly(app, waiting).await;

    match result {
        Ok(critiques) => {
            let text = render_critiques(rounds + 1, &critiques);
            app.delivery
                .send_long(query.chat_id, &text, Some(&debate_keyboard(true)))
                .await;
        }
        Err(e) => {
            send_plain(app, query.chat_id, &error_notice("Error", &e)).await;
        }
    }
    Ok(())
}

async fn debate_summary(app: &App, query: &CallbackQuery) -> ParleyResult<()> {
    if app.orchestrator.debate_state(query.user_id) == DebateState::Idle {
        return answer(app, query, Some("Nothing to summarize")).await;
    }
    answer(app, query, Some("Summarizing...")).await?;

    let waiting = send_plain(app, query.chat_id, "Preparing the final summary...").await;
    let result = app.orchestrator.summarize(query.user_id).await;
    delete_quietly(app, waiting).await;

    match result {
        Ok(summary) => {
            let text = format!("Debate summary\n\n{}", summary.generation.text);
            app.delivery.send_long(query.chat_id, &text, None).await;
        }
        Err(e) => {
            send_plain(app, query.chat_id, &error_notice("Summary failed", &e)).await;
        }
    }
    Ok(())
}

async fn answer(app: &App, query: &CallbackQuery, text: Option<&str>) -> ParleyResult<()> {
    app.telegram.answer_callback(&query.id, text).await
}

/// `"<prefix>: <detail>"` with the detail cut to [`MAX_ERROR_DETAIL_CHARS`].
fn error_notice(prefix: &str, err: &impl std::fmt::Display) -> String {
    let detail = err.to_string();
    format!("{prefix}: {}", truncate_chars(&detail, MAX_ERROR_DETAIL_CHARS))
}

async fn send_plain(app: &App, chat_id: ChatId, text: &str) -> Option<MessageHandle> {
    match app.telegram.send(chat_id, text, TextFormat::Plain, None).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(chat_id, error = %e, "Failed to send message");
            None
        }
    }
}

async fn send_html(app: &App, chat_id: ChatId, html: &str) {
    if let Err(e) = app.telegram.send(chat_id, html, TextFormat::Html, None).await {
        warn!(chat_id, error = %e, "Failed to send message");
    }
}

async fn delete_quietly(app: &App, handle: Option<MessageHandle>) {
    if let Some(handle) = handle {
        if let Err(e) = app.telegram.delete(&handle).await {
            warn!(error = %e, "Failed to delete status message");
        }
    }
}
